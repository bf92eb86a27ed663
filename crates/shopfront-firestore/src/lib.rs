//! Firestore REST API client for edge runtimes.
//!
//! This crate provides:
//! - Service-account credential loading from the environment
//! - RS256 JWT assertion minting and token exchange, with a token cache
//! - The native <-> wire value codec
//! - Document CRUD and structured queries over HTTPS
//! - A [`DocumentStore`] trait with an in-memory implementation

pub mod client;
pub mod codec;
pub mod credential;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod query;
pub mod retry;
pub mod store;
pub mod token;
pub mod token_cache;
pub mod types;


pub use client::{FirestoreClient, FirestoreConfig};
pub use codec::{decode, decode_fields, encode, encode_fields, Fields, NativeValue};
pub use credential::ServiceAccountCredential;
pub use error::{FirestoreError, FirestoreResult};
pub use memory::MemoryStore;
pub use query::{Direction, FieldOp, Query};
pub use retry::RetryConfig;
pub use store::{DocumentData, DocumentStore};
pub use token::{AccessToken, TokenMinter};
pub use token_cache::TokenCache;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
