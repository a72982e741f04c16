use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_hw::{Camera, VideoTrack};

#[zbus::proxy(
    interface = "org.rollcall.Kiosk1",
    default_service = "org.rollcall.Kiosk1",
    default_path = "/org/rollcall/Kiosk1"
)]
trait Kiosk {
    async fn open_session(&self) -> zbus::Result<String>;
    async fn trigger(&self) -> zbus::Result<String>;
    async fn close_session(&self) -> zbus::Result<bool>;
    async fn reload_gallery(&self) -> zbus::Result<u32>;
    async fn list_attendance(&self, date: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a recognition session
    Open,
    /// Open a session, run one attempt, then close it
    Recognize,
    /// Close the current session
    Close,
    /// Refetch operators and rebuild the gallery
    Reload,
    /// List attendance records
    Attendance {
        /// Date as YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Show daemon status
    Status,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Device to test
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
    },
}

async fn proxy() -> Result<KioskProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("cannot reach the session bus")?;
    KioskProxy::new(&connection)
        .await
        .context("rollcalld is not running")
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{raw}"),
        },
        Err(_) => println!("{raw}"),
    }
}

fn camera_test(device: &str) -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    println!("Opening {device}...");
    let camera = Camera::open(device, 4)?;
    tracing::debug!(device, "camera opened for diagnostics");
    println!(
        "  {}x{} {}",
        camera.width,
        camera.height,
        String::from_utf8_lossy(&camera.fourcc.repr)
    );

    let mut track: Box<dyn VideoTrack> = Box::new(camera);
    let result = track.capture();
    track.stop();

    let frame = result?;
    println!(
        "  frame #{}: avg brightness {:.1}{}",
        frame.sequence,
        frame.avg_brightness(),
        if frame.is_dark() { " (dark)" } else { "" }
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Open => {
            let state = proxy().await?.open_session().await?;
            println!("Session open ({state})");
        }
        Commands::Recognize => {
            let kiosk = proxy().await?;
            kiosk.open_session().await?;
            let outcome = kiosk.trigger().await;
            kiosk.close_session().await?;
            print_json(&outcome?);
        }
        Commands::Close => {
            if proxy().await?.close_session().await? {
                println!("Session closed");
            } else {
                println!("No session was open");
            }
        }
        Commands::Reload => {
            let size = proxy().await?.reload_gallery().await?;
            println!("Gallery rebuilt: {size} reference faces");
        }
        Commands::Attendance { date } => {
            let records = proxy()
                .await?
                .list_attendance(date.as_deref().unwrap_or(""))
                .await?;
            print_json(&records);
        }
        Commands::Status => {
            let status = proxy().await?.status().await?;
            print_json(&status);
        }
        Commands::Test { device } => {
            println!("Running camera diagnostics...");
            camera_test(&device)?;
        }
    }

    Ok(())
}
