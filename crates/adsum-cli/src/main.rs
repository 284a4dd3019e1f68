use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.adsum.Kiosk1",
    default_service = "org.adsum.Kiosk1",
    default_path = "/org/adsum/Kiosk1"
)]
trait Kiosk {
    async fn recognize(&self, image: &[u8]) -> zbus::Result<String>;
    async fn enroll(&self, employee_id: i64, image: &[u8]) -> zbus::Result<String>;
    async fn list_faces(&self, employee_id: i64) -> zbus::Result<String>;
    async fn remove_face(&self, employee_id: i64, face_id: i64) -> zbus::Result<bool>;
    async fn sweep_absences(&self, date: &str) -> zbus::Result<String>;
    async fn today_schedule(&self, date: &str) -> zbus::Result<String>;
    async fn refresh_index(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "adsum", about = "Adsum attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize a face image and apply check-in/check-out
    Recognize {
        /// Path to a JPEG/PNG image
        image: PathBuf,
    },
    /// Enroll a face image for an employee
    Enroll {
        /// Employee id
        #[arg(short, long)]
        employee: i64,
        /// Path to a JPEG/PNG image
        image: PathBuf,
    },
    /// List enrolled faces for an employee
    Faces {
        /// Employee id
        employee: i64,
    },
    /// Remove an enrolled face
    RemoveFace {
        /// Employee id
        employee: i64,
        /// Face id
        face: i64,
    },
    /// Run the absence sweep (date defaults to today)
    Sweep {
        /// Date as YYYY-MM-DD
        date: Option<String>,
    },
    /// Show the effective schedule (date defaults to today)
    Schedule {
        /// Date as YYYY-MM-DD
        date: Option<String>,
    },
    /// Rebuild the daemon's matching index
    RefreshIndex,
    /// Show daemon status
    Status,
}

/// Re-indent a JSON reply for the terminal; fall back to raw text.
fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())
        ),
        Err(_) => println!("{raw}"),
    }
}

fn read_image(path: &PathBuf) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let kiosk = KioskProxy::new(&connection)
        .await
        .context("connecting to adsumd — is the daemon running?")?;

    match cli.command {
        Commands::Recognize { image } => {
            let bytes = read_image(&image)?;
            print_json(&kiosk.recognize(&bytes).await?);
        }
        Commands::Enroll { employee, image } => {
            let bytes = read_image(&image)?;
            print_json(&kiosk.enroll(employee, &bytes).await?);
        }
        Commands::Faces { employee } => {
            print_json(&kiosk.list_faces(employee).await?);
        }
        Commands::RemoveFace { employee, face } => {
            if kiosk.remove_face(employee, face).await? {
                println!("Face {face} removed");
            } else {
                println!("Face {face} not found for employee {employee}");
            }
        }
        Commands::Sweep { date } => {
            print_json(&kiosk.sweep_absences(date.as_deref().unwrap_or("")).await?);
        }
        Commands::Schedule { date } => {
            print_json(&kiosk.today_schedule(date.as_deref().unwrap_or("")).await?);
        }
        Commands::RefreshIndex => {
            let loaded = kiosk.refresh_index().await?;
            println!("Index rebuilt: {loaded} embeddings");
        }
        Commands::Status => {
            print_json(&kiosk.status().await?);
        }
    }

    Ok(())
}
