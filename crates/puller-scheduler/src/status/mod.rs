// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status service clients.

pub mod file;
pub mod memory;
mod traits;

pub use file::FileStatusClient;
pub use memory::InMemoryStatusClient;
pub use traits::*;
