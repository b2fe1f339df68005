pub mod conductor_config;
pub mod config;
pub mod errors;
pub mod llm;
pub mod locate;
pub mod orchestrator;
pub mod project;
pub mod prompts;
pub mod router;
pub mod sandbox;
pub mod scheduler;
pub mod stage;
pub mod stream;
pub mod ui;
pub mod user;
pub mod util;
pub mod workers;
pub mod workspace;
