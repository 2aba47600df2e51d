// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod api_method;
pub mod common;
pub mod dynamic;
pub mod error;
pub mod typed_api;
