//! Desired Ingress renderer
//!
//! Reads a Service manifest (YAML or JSON) from stdin and prints the Ingress
//! the operator would create for it, using the same environment
//! configuration as the operator.
//!
//! Usage: kubectl get svc web -o yaml | cargo run --bin render-ingress

use std::io::{self, Read};

use k8s_openapi::api::core::v1::Service;

use service_ingress_operator::reconcilers::{desired, ENABLE_ANNOTATION};
use service_ingress_operator::{Config, Result};

fn main() -> Result<()> {
    let config = Config::load_from_env()?;

    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    let service: Service = serde_yaml::from_str(&input)?;

    if !desired::is_exposed(&service) {
        eprintln!(
            "note: Service lacks the '{}' annotation; the operator would not create this Ingress",
            ENABLE_ANNOTATION
        );
    }

    let ingress = desired::build(&config.ingress_template(), &service);
    print!("{}", serde_yaml::to_string(&ingress)?);
    Ok(())
}
