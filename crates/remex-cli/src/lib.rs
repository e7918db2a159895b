// Copyright 2025 remex Authors
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

//! # remex CLI
//!
//! Command-line front end for remex hosts.
//!
//! ## Key Commands
//!
//! - `remex serve`: load a script into a host and listen for commands
//! - `remex call`: evaluate one expression on a remote host and print the
//!   result (no logging, so the output can be piped)

pub mod call;
pub mod serve;
