// Copyright 2025 John Brosnihan
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
//! Error values for the simulation kernel
//!
//! Every fallible kernel operation returns a [`KernelError`] carrying an
//! [`ErrorKind`], a human-readable message and the call site that produced
//! it. Constructors and mutators validate their inputs and report through
//! this type instead of panicking.
//!
//! Each constructed error also bumps a process-wide counter for its kind.
//! The counters are instrumentation only; nothing in the kernel reads them
//! to make decisions.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Category of a kernel error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required input was missing
    NullInput,
    /// An argument violated a documented precondition
    InvalidParameter,
    /// An index, coordinate or slot request fell outside the valid range
    OutOfRange,
    /// A fixed resource budget (cells, slots) would be exceeded
    OutOfResources,
    /// The platform allocator refused a request
    AllocationFailure,
}

impl ErrorKind {
    /// All kinds, in counter order
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::NullInput,
        ErrorKind::InvalidParameter,
        ErrorKind::OutOfRange,
        ErrorKind::OutOfResources,
        ErrorKind::AllocationFailure,
    ];

    fn counter_index(self) -> usize {
        match self {
            ErrorKind::NullInput => 0,
            ErrorKind::InvalidParameter => 1,
            ErrorKind::OutOfRange => 2,
            ErrorKind::OutOfResources => 3,
            ErrorKind::AllocationFailure => 4,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NullInput => "null input",
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::OutOfRange => "out of range",
            ErrorKind::OutOfResources => "out of resources",
            ErrorKind::AllocationFailure => "allocation failure",
        };
        f.write_str(name)
    }
}

/// Error returned by kernel operations
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message} (at {location})")]
pub struct KernelError {
    kind: ErrorKind,
    message: String,
    location: &'static Location<'static>,
}

impl KernelError {
    /// Create an error of the given kind, recording the caller as provenance
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ERROR_COUNTERS[kind.counter_index()].fetch_add(1, Ordering::Relaxed);
        KernelError {
            kind,
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// Shorthand for [`ErrorKind::InvalidParameter`]
    #[track_caller]
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameter, message)
    }

    /// Shorthand for [`ErrorKind::OutOfRange`]
    #[track_caller]
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfRange, message)
    }

    /// Shorthand for [`ErrorKind::OutOfResources`]
    #[track_caller]
    pub fn out_of_resources(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfResources, message)
    }

    /// Shorthand for [`ErrorKind::AllocationFailure`]
    #[track_caller]
    pub fn allocation_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AllocationFailure, message)
    }

    /// The error category
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message, without kind or location
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source location where the error was raised
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

/// Result alias used throughout the kernel
pub type Result<T> = std::result::Result<T, KernelError>;

static ERROR_COUNTERS: [AtomicU64; 5] = [
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
];

/// Snapshot of how many errors of each kind were raised in this process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounts {
    counts: [u64; 5],
}

impl ErrorCounts {
    /// Number of errors raised with `kind`
    pub fn get(&self, kind: ErrorKind) -> u64 {
        self.counts[kind.counter_index()]
    }

    /// Sum over all kinds
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Read the process-wide error counters
pub fn error_counts() -> ErrorCounts {
    let mut counts = [0u64; 5];
    for (slot, counter) in counts.iter_mut().zip(ERROR_COUNTERS.iter()) {
        *slot = counter.load(Ordering::Relaxed);
    }
    ErrorCounts { counts }
}

/// Reset the process-wide error counters to zero
pub fn reset_error_counts() {
    for counter in ERROR_COUNTERS.iter() {
        counter.store(0, Ordering::Relaxed);
    }
}
