// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::plan::ConvergenceStep;
use crate::astarte_controller::exec::resource::{common::make_config_map, create_or_update};
use crate::astarte_controller::trusted::spec_types::Astarte;
use crate::kubernetes_api_objects::typed_api::TypedApi;
use crate::shim_layer::controller_runtime::Data;
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;

pub const VM_ARGS_KEY: &str = "vm.args";

const VM_ARGS: &str = "## Name of the node
-name ${RELEASE_NAME}@${MY_POD_IP}

## Cookie for distributed erlang
-setcookie ${ERLANG_COOKIE}

## Enable SMP automatically based on availability
-smp auto
";

/// The `vm.args` shared by every Astarte service, mounted at /beamconfig.
pub struct GenericErlangConfigurationStep;

pub fn make_generic_erlang_configuration(astarte: &Astarte) -> Result<ConfigMap, Error> {
    make_config_map(
        astarte,
        generic_erlang_configuration_name(astarte),
        make_labels(&astarte_name(astarte)),
        BTreeMap::from([(VM_ARGS_KEY.to_string(), VM_ARGS.to_string())]),
    )
}

#[async_trait]
impl ConvergenceStep for GenericErlangConfigurationStep {
    fn name(&self) -> String {
        "generic-erlang-configuration".to_string()
    }

    async fn ensure(&self, astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
        let config_map = make_generic_erlang_configuration(astarte)?;
        let namespace = astarte_namespace(astarte);
        create_or_update(&TypedApi::namespaced(ctx.api.as_ref(), &namespace), &config_map).await?;
        Ok(())
    }
}
