// Copyright 2026 flashproto contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Host-side client for the INSYNC/EOC serial bootloader protocol.
//!
//! A collaborator (CLI, GUI, or test harness) drives a [`Session`] through
//! connect → erase → program → boot, supplying a real [`SerialTransport`] or
//! its own [`Transport`] implementation.

pub mod baud;
pub mod client;
pub mod constants;
pub mod crc32;
pub mod descriptor;
pub mod error;
pub mod framer;
pub mod identity;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use identity::Identity;
pub use session::{BaudPolicy, ProgressPhase, Session, SessionState};
pub use transport::{list_ports, SerialTransport, Transport};
