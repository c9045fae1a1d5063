use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parceldesk::clock::SystemClock;
use parceldesk::models::parcel::{ParcelFilter, ParcelStatus};
use parceldesk::signing::{self, PickupSigner};
use parceldesk::store::postgres::PgStore;
use parceldesk::{cli, config, lifecycle::RegisterParcel, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Keygen) => {
            println!("{}", signing::generate_key_hex());
            Ok(())
        }
        Some(cli::Commands::Serve { port }) => {
            let cfg = config::load()?;
            let port = port.unwrap_or(cfg.port);
            server::run(cfg, port).await
        }
        Some(cli::Commands::Token {
            command: cli::TokenCommands::Verify { token },
        }) => {
            let cfg = config::load()?;
            verify_token(&cfg, &token)
        }
        Some(cli::Commands::Token {
            command: cli::TokenCommands::Issue { parcel_id },
        }) => {
            let state = connect(config::load()?).await?;
            let issued = state.lifecycle.issue_pickup_token(parcel_id).await?;
            println!(
                "Pickup token:\n  {}\n  Expires: {}",
                issued.token,
                issued.expires_at.to_rfc3339()
            );
            Ok(())
        }
        Some(cli::Commands::Qr { parcel_id, out }) => {
            let state = connect(config::load()?).await?;
            let qr = state.lifecycle.issue_qr_png(parcel_id).await?;
            tokio::fs::write(&out, &qr.image)
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "QR code written to {} (expires {})",
                out.display(),
                qr.expires_at.to_rfc3339()
            );
            Ok(())
        }
        Some(cli::Commands::Parcel { command }) => {
            let state = connect(config::load()?).await?;
            let result = handle_parcel_command(command, &state).await;
            // Registration and confirmation queue webhook events; deliver
            // them before the runtime goes away.
            state.lifecycle.flush_notifications().await;
            result
        }
        None => {
            let cfg = config::load()?;
            let port = cfg.port;
            server::run(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    opentelemetry::global::shutdown_tracer_provider();
    result
}

/// `RUST_LOG` filter, plain or JSON fmt output, and OTLP export when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "parceldesk"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json = std::env::var("PARCELDESK_LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "parceldesk=debug,tower_http=debug".into()),
        ))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .with(telemetry_layer)
        .init();

    Ok(())
}

async fn connect(cfg: config::Config) -> anyhow::Result<Arc<AppState>> {
    let db = PgStore::connect(&cfg.database_url, cfg.db_max_connections).await?;
    server::build_state(cfg, Arc::new(db))
}

fn verify_token(cfg: &config::Config, token: &str) -> anyhow::Result<()> {
    let signer = PickupSigner::from_hex(&cfg.signing_key, Arc::new(SystemClock))?;
    match signer.verify(token.trim(), cfg.token_ttl) {
        Ok(subject) => {
            println!("Valid pickup token for parcel {}", subject);
            Ok(())
        }
        Err(e) => anyhow::bail!("token rejected: {}", e),
    }
}

async fn handle_parcel_command(
    cmd: cli::ParcelCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    let desk = &state.lifecycle;
    match cmd {
        cli::ParcelCommands::Register {
            resident_id,
            description,
            service,
        } => {
            let parcel = desk
                .register_parcel(RegisterParcel {
                    resident_id,
                    description,
                    service,
                })
                .await?;
            println!(
                "Parcel registered:\n  ID:       {}\n  Tracking: {}",
                parcel.id, parcel.tracking_id
            );
        }
        cli::ParcelCommands::Show { id } => {
            let parcel = match id.parse::<i64>() {
                Ok(n) => desk.get_parcel(n).await?,
                Err(_) => {
                    let tracking = uuid::Uuid::parse_str(&id)
                        .context("expected a parcel id or a tracking UUID")?;
                    desk.get_parcel_by_tracking_id(tracking).await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&parcel)?);
        }
        cli::ParcelCommands::List {
            status,
            resident_id,
            limit,
            offset,
        } => {
            let mut filter = ParcelFilter::paged(limit, offset);
            filter.status = status
                .as_deref()
                .map(str::parse::<ParcelStatus>)
                .transpose()?;
            filter.resident_id = resident_id;

            let parcels = desk.list_parcels(&filter).await?;
            if parcels.is_empty() {
                println!("No parcels found.");
            } else {
                println!(
                    "{:<8} {:<38} {:<10} {:<10} {:<20}",
                    "ID", "TRACKING", "RESIDENT", "STATUS", "SERVICE"
                );
                for p in parcels {
                    println!(
                        "{:<8} {:<38} {:<10} {:<10} {:<20}",
                        p.id,
                        p.tracking_id.to_string(),
                        p.resident_id,
                        p.status.as_str(),
                        p.service.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        cli::ParcelCommands::Confirm { id } => {
            let parcel = desk.confirm_direct(id).await?;
            println!(
                "Parcel {} picked up at {}",
                parcel.id,
                parcel
                    .picked_up_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}
