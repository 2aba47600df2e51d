// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod astarte_e2e;
pub mod common;

use astarte_e2e::{astarte_deletion_e2e_test, astarte_e2e_test, astarte_upgrade_e2e_test};
use common::Error;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).cloned().unwrap_or_default();
    match cmd.as_str() {
        "astarte" => {
            println!("Running astarte end-to-end test");
            astarte_e2e_test().await
        }
        "astarte-upgrade" => {
            println!("Running astarte end-to-end test for upgrade");
            astarte_upgrade_e2e_test().await
        }
        "astarte-deletion" => {
            println!("Running astarte end-to-end test for deletion");
            astarte_deletion_e2e_test().await
        }
        _ => {
            println!("Please specify one test: astarte, astarte-upgrade or astarte-deletion");
            Ok(())
        }
    }
}
