pub mod clock;
pub mod error;
pub mod gate;
pub mod intensity;
pub mod message;
pub mod parser;
pub mod pipeline;
pub mod receiver;
pub mod registry;
pub mod settings;
pub mod sink;
pub mod state;
pub mod streams;
