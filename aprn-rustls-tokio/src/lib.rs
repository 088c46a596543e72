#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # aprn-rustls-tokio
//!
//! Tokio accept/connect helpers for [aprn-rustls](https://docs.rs/aprn-rustls)
//! session configurations.
//!
//! `TlsAcceptor` and `TlsConnector` wrap `tokio-rustls` and return
//! `(TlsStream, PeerIdentity)` after a successful handshake, where the
//! identity is the expected peer the handshake matched.
//!
//! ## Example
//!
//! ```no_run
//! # async fn example(
//! #     session: aprn_rustls::SessionConfig,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! use aprn_rustls_tokio::TlsConnector;
//!
//! let connector = TlsConnector::new(&session)?;
//! let server_name = rustls::pki_types::ServerName::try_from("node-42.internal")?;
//! let (_tls, peer) = connector
//!     .connect_addr("127.0.0.1:8443".parse()?, server_name)
//!     .await?;
//! println!("connected to {:?}", peer.identity());
//! # Ok(())
//! # }
//! ```

mod acceptor;
mod connector;
mod error;
mod identity;

pub use acceptor::TlsAcceptor;
pub use connector::TlsConnector;
pub use error::Error;
pub use identity::PeerIdentity;
