//! In-process subscription server.
//!
//! [`EmbeddedServer`] keeps documents, subscription definitions and
//! checkpoints in memory and serves subscription connections without a
//! network hop. Workers and the [`DocumentSubscriptions`](crate::DocumentSubscriptions)
//! facade run against it unchanged, which makes it the backend of choice for
//! end-to-end tests and local development.
//!
//! Subscription queries are limited to
//! `from <Collection> [where <Field> = '<value>'] [include ...]`.

mod connection;
mod documents;
mod filter;
mod registry;
mod server;

pub use documents::StoredDocument;
pub use server::EmbeddedServer;
