// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities used by the binary before the operator starts.

pub mod crd;

pub use crd::{wait_for_crd, wait_for_resource};
