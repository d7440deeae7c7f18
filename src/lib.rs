pub mod core;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod processing;
pub mod rag;
pub mod server;
pub mod state;
pub mod vector_math;
