// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Branch descriptors and destination paths.

use serde::{Deserialize, Serialize};

/// Where a branch comes from, which decides how it is pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    /// Pushed by users to the hosting area.
    Hosted,
    /// Mirrored from an external location.
    Mirrored,
    /// Produced by a foreign-VCS import.
    Imported,
}

impl BranchType {
    /// Name passed to workers.
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchType::Hosted => "HOSTED",
            BranchType::Mirrored => "MIRRORED",
            BranchType::Imported => "IMPORTED",
        }
    }

    /// Lowercase name used for lock and run names.
    pub fn slug(&self) -> &'static str {
        match self {
            BranchType::Hosted => "hosted",
            BranchType::Mirrored => "mirrored",
            BranchType::Imported => "imported",
        }
    }
}

impl std::fmt::Display for BranchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BranchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hosted" => Ok(BranchType::Hosted),
            "mirrored" => Ok(BranchType::Mirrored),
            "imported" => Ok(BranchType::Imported),
            other => Err(format!("unknown branch type: {}", other)),
        }
    }
}

/// One entry of the pull queue as returned by the status service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullQueueEntry {
    pub branch_id: i64,
    pub source_url: String,
    pub unique_name: String,
}

/// Everything a mirror job needs to know about its branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchToMirror {
    pub branch_id: i64,
    pub source_url: String,
    pub destination_url: String,
    pub unique_name: String,
    pub branch_type: BranchType,
}

/// Split a branch id into a directory path, e.g. `0x12c` -> `00/00/01/2c`.
pub fn branch_id_to_path(branch_id: i64) -> String {
    let hex = format!("{:08x}", branch_id);
    let mut path = String::with_capacity(hex.len() + hex.len() / 2);
    for (i, c) in hex.chars().enumerate() {
        if i > 0 && i % 2 == 0 {
            path.push('/');
        }
        path.push(c);
    }
    path
}

/// Destination location template.
///
/// `{path}` is replaced by [`branch_id_to_path`] and `{branch_id}` by the
/// decimal id. A template without `{path}` gets the path appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTemplate(String);

impl DestinationTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn render(&self, branch_id: i64) -> String {
        let path = branch_id_to_path(branch_id);
        if self.0.contains("{path}") {
            self.0
                .replace("{path}", &path)
                .replace("{branch_id}", &branch_id.to_string())
        } else {
            format!(
                "{}/{}",
                self.0
                    .replace("{branch_id}", &branch_id.to_string())
                    .trim_end_matches('/'),
                path
            )
        }
    }
}

impl Default for DestinationTemplate {
    fn default() -> Self {
        Self::new(".data/mirrors/{path}")
    }
}
