// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource types served by the demo operator.

pub mod widget;

pub use widget::{Widget, WidgetSpec, WidgetStatus};
