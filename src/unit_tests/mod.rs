// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod executable_model;
pub mod fixtures;
pub mod reconciler;
