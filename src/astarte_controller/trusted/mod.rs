// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod spec_types;
