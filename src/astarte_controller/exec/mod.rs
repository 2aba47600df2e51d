// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod ca_source;
pub mod credentials;
pub mod finalizer;
pub mod health;
pub mod plan;
pub mod reconciler;
pub mod resource;
pub mod upgrade;
pub mod version;
