pub mod cache;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod deadline;
pub mod error;
pub mod handlers;
pub mod history;
pub mod http;
pub mod models;
pub mod normalize;
pub mod outcome;
pub mod prompt;
pub mod redis;
pub mod repository;
pub mod repository_traits;
pub mod router;
pub mod service;
pub mod temporal;
pub mod tools;
pub mod transport;
pub mod usage;
pub mod validation;

#[cfg(test)]
pub mod test_support;

pub use config::Config;
pub use error::{Result, TutorError};
pub use service::{Collaborators, TutorAnswer, TutorOutcome, TutorService};
