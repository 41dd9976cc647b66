//! Cohort CLI - Main entry point.

use cohort::cli::{Cli, CohortCommands, Commands, LineageCommands};
use cohort::client::AdminClient;
use cohort::cohort::{ConnectionDescriptor, MemberRegistration};
use cohort::config::CohortConfig;
use serde::Serialize;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Serve {
            collection_id,
            server_name,
            bind_addr,
            advertise,
            registry_file,
            no_metrics,
        } => {
            let mut config = match &cli.config {
                Some(path) => CohortConfig::from_file(path)?,
                None => CohortConfig::development(),
            };
            if let Some(id) = collection_id {
                config.local.metadata_collection_id = id;
            }
            if let Some(name) = server_name {
                config.local.server_name = name;
            }
            if let Some(addr) = bind_addr {
                config.server.bind_addr = addr.parse()?;
            }
            if advertise.is_some() {
                config.server.advertised_endpoint = advertise;
            }
            if registry_file.is_some() {
                config.registry_file = registry_file;
            }
            if no_metrics {
                config.observability.metrics_enabled = false;
            }
            config.observability.log_level = cli.log_level;

            cohort::run(config).await?;
        }

        Commands::Cohort { command } => match command {
            CohortCommands::Status { addr } => {
                print_json(&AdminClient::new(&addr).status().await?)?;
            }
            CohortCommands::Members { addr } => {
                let members = AdminClient::new(&addr).members().await?;
                if members.is_empty() {
                    println!("No remote members");
                }
                for member in members {
                    println!(
                        "{:<24} {:<20} {}",
                        member.metadata_collection_id, member.server_name, member.connection.endpoint
                    );
                }
            }
            CohortCommands::Join {
                id,
                endpoint,
                server_name,
                addr,
            } => {
                let name = server_name.unwrap_or_else(|| id.clone());
                let member = MemberRegistration::new(id.clone(), name, ConnectionDescriptor::http(endpoint));
                if AdminClient::new(&addr).join(&member).await? {
                    println!("Member {} joined", id);
                } else {
                    println!("Member {} already registered", id);
                }
            }
            CohortCommands::Leave { id, addr } => {
                let report = AdminClient::new(&addr).leave(&id).await?;
                println!(
                    "Member {} left: {} reference copies, {} buffered vertices purged",
                    id, report.reference_copies, report.buffer_vertices
                );
            }
        },

        Commands::Lineage { command } => match command {
            LineageCommands::Promote { addr } => {
                print_json(&AdminClient::new(&addr).promote().await?)?;
            }
            LineageCommands::Reset { addr } => {
                let markers = AdminClient::new(&addr).reset_lineage().await?;
                println!("Lineage reset, {} promotion markers cleared", markers);
            }
            LineageCommands::Show {
                guid,
                scope,
                include_processes,
                addr,
            } => {
                let view = AdminClient::new(&addr)
                    .lineage(&guid, scope.into(), include_processes)
                    .await?;
                print_json(&view)?;
            }
        },

        Commands::Entity {
            guid,
            type_name,
            addr,
        } => {
            let lookup = AdminClient::new(&addr)
                .federated_entity(&guid, type_name.as_deref())
                .await?;
            for diagnostic in &lookup.diagnostics {
                eprintln!(
                    "warning: {} did not answer ({:?}): {}",
                    diagnostic.metadata_collection_id, diagnostic.kind, diagnostic.message
                );
            }
            print_json(&lookup.value)?;
        }

        Commands::Version => {
            println!("cohort v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
