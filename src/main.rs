use clap::Parser;
use env_logger::Env;
use freezer::case::CaseDirectory;
use freezer::cli::{AcquireArgs, Args, Command};
use freezer::models::{AcquisitionRequest, CaseInfo, StopRequest};
use freezer::probes::ProbeSet;
use freezer::ui::AcquisitionConsole;
use freezer::{pipeline, Configuration, Orchestrator};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

type MainResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn display_banner() {
    let user = whoami::username();
    let host = whoami::devicename();
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;

    println!();
    println!("    \x1b[1;38;5;51m❄  FREEZER\x1b[0m  \x1b[3;38;5;147m\"Evidence that stays the way you found it\"\x1b[0m");
    println!("    \x1b[38;5;240m┌─ SYSTEM INFO ─────────────────────────────────────┐\x1b[0m");
    let format_line = |label: &str, value: &str| {
        format!("      \x1b[38;5;240m◉ {:<10}\x1b[0m\x1b[38;5;145m{}\x1b[0m", label, value)
    };
    println!("{}", format_line("User", &user));
    println!("{}", format_line("Host", &host));
    println!("{}", format_line("Platform", &format!("{}/{}", os, arch)));
    println!("{}", format_line("Version", env!("CARGO_PKG_VERSION")));
    println!("    \x1b[38;5;240m└───────────────────────────────────────────────────┘\x1b[0m");
    println!();
}

#[tokio::main]
async fn main() -> MainResult {
    let args = Args::parse();

    let log_level = if args.quiet {
        "error"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let config = Configuration::load(args.config.as_deref())?;
    log::debug!("Freezer starting with args: {:?}", args);

    match args.command {
        Command::Acquire(acquire) => {
            if !args.quiet {
                display_banner();
            }
            acquire_url(config, acquire, args.quiet).await
        }
        Command::Verify { directory } => {
            let report = pipeline::verify(&directory)?;
            println!(
                "    \x1b[38;5;240m├─\x1b[0m Verified: \x1b[1;37m{}\x1b[0m",
                report.verified
            );
            for name in &report.mismatched {
                println!("    \x1b[38;5;196m✗\x1b[0m modified: {}", name);
            }
            for name in &report.missing {
                println!("    \x1b[38;5;196m✗\x1b[0m missing: {}", name);
            }
            for name in &report.unlisted {
                println!("    \x1b[38;5;196m✗\x1b[0m not in manifest: {}", name);
            }
            if report.is_intact() {
                println!("    \x1b[38;5;46m▶\x1b[0m \x1b[1;37mAcquisition intact\x1b[0m \x1b[38;5;46m✓\x1b[0m");
                Ok(())
            } else {
                Err(format!(
                    "{} modified, {} missing, {} not in manifest",
                    report.mismatched.len(),
                    report.missing.len(),
                    report.unlisted.len()
                )
                .into())
            }
        }
        Command::Cases => {
            for case in CaseDirectory::new(config.cases_folder.clone()).list_cases()? {
                println!("{}", case);
            }
            Ok(())
        }
        Command::Config => {
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

async fn acquire_url(config: Configuration, args: AcquireArgs, quiet: bool) -> MainResult {
    let case_info = CaseInfo {
        name: args.case.clone(),
        lawyer_name: args.lawyer.clone(),
        proceeding_type: args.proceeding_type.clone(),
        courthouse: args.courthouse.clone(),
        proceeding_number: args.proceeding_number.clone(),
    };
    let request = AcquisitionRequest {
        acquisition_type: args.acquisition_type,
        case_info,
        target_url: args.url.clone(),
        tasks: args.start_tasks.clone(),
    };
    let stop = StopRequest {
        url: args.url.clone(),
        external: args.stop_tasks.clone(),
        internal: if args.no_page_capture {
            Vec::new()
        } else {
            freezer::task::TaskKind::DEFAULT_INTERNAL.to_vec()
        },
    };

    let console = std::sync::Arc::new(AcquisitionConsole::new(quiet)?);
    let (ui_tx, ui_rx) = mpsc::channel(1000);
    let ui_task = {
        let console = std::sync::Arc::clone(&console);
        tokio::spawn(async move { console.run(ui_rx).await })
    };

    let probes = ProbeSet::from_config(&config);
    let mut orchestrator = Orchestrator::new(config, probes).with_ui(ui_tx);

    let directory = orchestrator.start(request).await?;
    log::info!("Acquiring into {:?}", directory);

    match args.duration {
        Some(secs) => {
            log::info!("Stopping automatically in {}s", secs);
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
        None => {
            println!("    \x1b[38;5;33m▶\x1b[0m \x1b[1;37mPress Enter to stop the acquisition\x1b[0m");
            let mut line = String::new();
            BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        }
    }

    let summary = orchestrator.stop(stop).await?;
    drop(orchestrator);
    let _ = ui_task.await;

    console.print_summary(&summary);
    if quiet {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}
