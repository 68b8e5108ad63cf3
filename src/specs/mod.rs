pub mod envelope;
pub mod extensions;
pub mod openai;
