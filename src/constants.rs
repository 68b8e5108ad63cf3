/// Content literal that marks the end of generated text inside the envelope stream.
pub const TERMINAL_SENTINEL: &str = "[DONE]";

/// Framing prefix on each upstream server-sent line.
pub const DATA_PREFIX: &str = "data:";

/// Upstream API versions
pub const LEGACY_PREVIEW_API_VERSION: &str = "2023-06-01-preview";
pub const DEFAULT_PREVIEW_API_VERSION: &str = "2023-08-01-preview";
pub const DEFAULT_CHAT_API_VERSION: &str = "2023-08-01-preview";

/// Upstream headers
pub const API_KEY_HEADER: &str = "api-key";
pub const USER_AGENT_HEADER: &str = "x-ms-useragent";
pub const APIM_REQUEST_ID_HEADER: &str = "apim-request-id";
pub const USER_AGENT: &str = concat!("conduit/", env!("CARGO_PKG_VERSION"));

/// Platform auth headers
pub const AAD_ACCESS_TOKEN_HEADER: &str = "x-ms-token-aad-access-token";
pub const PRINCIPAL_ID_HEADER: &str = "x-ms-client-principal-id";
pub const PRINCIPAL_NAME_HEADER: &str = "x-ms-client-principal-name";
pub const PRINCIPAL_IDP_HEADER: &str = "x-ms-client-principal-idp";
pub const AAD_ID_TOKEN_HEADER: &str = "x-ms-token-aad-id-token";
pub const CLIENT_PRINCIPAL_HEADER: &str = "x-ms-client-principal";

/// Principal used when the platform auth proxy is absent (local development).
pub const DEVELOPMENT_PRINCIPAL_ID: &str = "00000000-0000-0000-0000-000000000000";
pub const DEVELOPMENT_PRINCIPAL_NAME: &str = "testusername@constoso.com";

pub const DEFAULT_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";

/// Deployment labels accepted in `selectedGPTVersion`
pub const GPT3_LABEL: &str = "GPT 3.5";
pub const GPT4_LABEL: &str = "GPT 4.0";

pub const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are an AI assistant that helps people find information.";
pub const DEFAULT_FUNCTION_SYSTEM_MESSAGE: &str = "You are an experienced legal reviewer. \
Compare third-party agreements against the internal template clause by clause. \
Every word of a clause matters: mark a clause as non-conforming when its wording, \
deadlines or covered exceptions differ from the template. \
Use the available functions to fetch the selected template and documents.";

pub const TITLE_PROMPT: &str = "Summarize the conversation so far into a 4-word or less title. \
Do not use any quotation marks or punctuation. Respond with a json object in the format \
{\"title\": string}. Do not include any other commentary or description.";
pub const TITLE_MAX_TOKENS: u32 = 64;

pub const DEFAULT_FILENAME_FILTER_FIELD: &str = "metadata_storage_name";

pub const HISTORY_PAGE_SIZE: i64 = 25;

/// Stream framing limits
pub const MAX_STREAM_LINE_BYTES: usize = 1024 * 1024;
pub const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Database defaults
pub const DB_PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode = WAL",
    "PRAGMA synchronous = NORMAL",
    "PRAGMA busy_timeout = 5000",
];

/// Keys masked before request bodies reach the logs.
pub const SECRET_KEYS: &[&str] = &[
    "key",
    "api-key",
    "connectionString",
    "embeddingKey",
    "encodedApiKey",
];
