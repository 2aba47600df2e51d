// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::AstarteComponent;
use crate::astarte_controller::exec::resource::{
    astarte_service::AstarteServiceBuilder,
    cassandra::CassandraBuilder,
    cfssl::{CfsslBuilder, CfsslCaSecretStep},
    dashboard::DashboardBuilder,
    erlang_configuration::GenericErlangConfigurationStep,
    housekeeping_key::HousekeepingKeyStep,
    rabbitmq::RabbitMqBuilder,
    vernemq::VerneMqBuilder,
    ComponentStep,
};
use crate::astarte_controller::trusted::spec_types::Astarte;
use crate::shim_layer::controller_runtime::Data;
use crate::Error;
use async_trait::async_trait;

/// One idempotent step of the convergence plan.
#[async_trait]
pub trait ConvergenceStep: Send + Sync {
    fn name(&self) -> String;

    async fn ensure(&self, astarte: &Astarte, ctx: &Data) -> Result<(), Error>;
}

pub type ConvergencePlan = Vec<Box<dyn ConvergenceStep>>;

// Dependencies come before the services using them: credentials and shared
// configuration, then the data stores, then the Astarte services (backends
// before their APIs), then the broker and the dashboard.
pub fn astarte_plan() -> ConvergencePlan {
    vec![
        Box::new(HousekeepingKeyStep),
        Box::new(GenericErlangConfigurationStep),
        Box::new(ComponentStep(RabbitMqBuilder)),
        Box::new(ComponentStep(CassandraBuilder)),
        Box::new(ComponentStep(CfsslBuilder)),
        Box::new(CfsslCaSecretStep),
        Box::new(ComponentStep(AstarteServiceBuilder(AstarteComponent::Housekeeping))),
        Box::new(ComponentStep(AstarteServiceBuilder(AstarteComponent::HousekeepingApi))),
        Box::new(ComponentStep(AstarteServiceBuilder(AstarteComponent::RealmManagement))),
        Box::new(ComponentStep(AstarteServiceBuilder(AstarteComponent::RealmManagementApi))),
        Box::new(ComponentStep(AstarteServiceBuilder(AstarteComponent::Pairing))),
        Box::new(ComponentStep(AstarteServiceBuilder(AstarteComponent::PairingApi))),
        Box::new(ComponentStep(AstarteServiceBuilder(AstarteComponent::TriggerEngine))),
        Box::new(ComponentStep(AstarteServiceBuilder(AstarteComponent::DataUpdaterPlant))),
        Box::new(ComponentStep(AstarteServiceBuilder(AstarteComponent::AppEngineApi))),
        Box::new(ComponentStep(VerneMqBuilder)),
        Box::new(ComponentStep(DashboardBuilder)),
    ]
}

pub async fn run_plan(plan: &[Box<dyn ConvergenceStep>], astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
    for step in plan {
        tracing::debug!(step = %step.name(), "ensuring");
        step.ensure(astarte, ctx).await?;
    }
    Ok(())
}
