//! HTTP/1.1 client protocol.
//!
//! - **`connection`**: the per-request state machine and its outcome handle
//! - **`parser`**: incremental response parser, plus a request-head parser
//! - **`request`** / **`response`**: the data model
//! - **`writer`**: request serialization and payload encoding
//! - **`headers`**, **`uri`**, **`cookies`**, **`redirects`**: supporting types
//!
//! # Connection State Machine
//!
//! ```text
//!   INIT ─► RESOLVE ─► CONNECT ─► HANDSHAKE ─► WRITE ─► READ_STATUS ─► READ_HEADERS
//!                                      (reused socket ───┘)                  │
//!                                                                            ▼
//!                         ┌───────────── body framing by response headers ───┤
//!                         │                 │                    │           │
//!                  READ_CONTENT_LENGTH  READ_CHUNK_HEADER ◄► READ_CHUNK_DATA  READ_UNTIL_EOF
//!                         │                 │                                │
//!                         └─────────────────┴──────────► SUCCESS ◄───────────┘
//!                                                          │ 301/302/303 and following
//!                                                          └─► back to RESOLVE
//!
//!   any phase ─► *_ERROR / TIMEOUT / REDIRECT_*     finished ─(store timeout)─► EXPIRED
//! ```
//!
//! A write or status read failing because a reused socket was closed by the
//! peer reconnects once instead of failing.

pub mod connection;
pub mod cookies;
pub mod headers;
pub mod parser;
pub mod redirects;
pub mod request;
pub mod response;
pub mod uri;
pub mod writer;
