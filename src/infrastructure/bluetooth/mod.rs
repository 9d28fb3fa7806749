//! Bluetooth Module
//!
//! Central-role BLE session bridge over a callback-driven radio stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       BleAdapter                         │
//! │   (Adapter trait - public API, timeout-bounded calls)    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┬──────────────┐
//!         ▼             ▼              ▼              ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌──────────────┐
//! │  Scanner  │  │ Connection │  │   GATT   │  │Characteristic│
//! │           │  │            │  │          │  │              │
//! │ - single  │  │ - connect  │  │ - catalog│  │ - write      │
//! │   flight  │  │ - pairing  │  │ - release│  │ - notify     │
//! └─────┬─────┘  └─────┬──────┘  └────┬─────┘  └──────┬───────┘
//!       │              │   Completion │ bridge        │
//!       └──────────────┴──────┬───────┴───────────────┘
//!                             │
//!               ┌─────────────┴─────────────┐
//!               │   Dispatcher (callbacks)   │◄── RadioStack
//!               └───────────────────────────┘    dispatch thread
//! ```
//!
//! ## Modules
//!
//! - [`stack`] - Radio stack boundary: requests, events, native records
//! - [`status`] - Native status codes and their translation into errors
//! - [`completion`] - Waiters that turn callbacks into awaitable results
//! - [`session`] - One-time bring-up, cleanup registry and close
//! - [`scanner`] - BLE device discovery
//! - [`connection`] - Connect, disconnect and pairing
//! - [`gatt`] - Service catalog and its release
//! - [`characteristic`] - Writes and notifications
//! - [`protocol`] - Smart ring command packets and UUIDs
//! - [`service`] - Main adapter
//! - [`sim`] - In-process radio stack

pub mod characteristic;
pub mod completion;
pub mod connection;
mod dispatch;
pub mod gatt;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod session;
pub mod sim;
pub mod stack;
pub mod status;

pub use service::{Adapter, BleAdapter};
pub use session::{enable, SessionManager};
