//! OpenAI-compatible client for talking to a discovered backend

pub mod openai;

pub use openai::{
    ask_model, ChatCompletionRequest, ChatCompletionResponse, Choice, ClientError, Message,
    OpenAiClient, OpenAiClientTrait,
};
