// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_inception)]
#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::new_without_default)]
#![allow(clippy::useless_vec)]

pub mod aggregate;
pub mod classify;
pub mod cli;
pub mod config;
pub mod connect;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod request;
pub mod response;
pub mod testcases;
pub mod worker;
