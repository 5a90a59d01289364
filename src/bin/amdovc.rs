use amdovc::adapters::{AdapterSelector, parse_adapter_list};
use amdovc::apply::ApplyPlan;
use amdovc::baseline::BaselineStore;
use amdovc::error_messages::print_error_with_solution;
use amdovc::sysfs_backend::SysfsBackend;
use amdovc::validation::{CapabilitySnapshot, validate};
use amdovc::{Config, OvcError, OverdriveSession, logger, parse_params, report};
use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use console::style;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "amdovc",
    version,
    about = "AMD Overdrive control for Linux",
    disable_help_flag = true,
    after_help = PARAM_HELP
)]
struct Cli {
    /// Print help
    #[arg(short = '?', long = "help", action = ArgAction::Help)]
    help: Option<bool>,

    /// Verbose adapter reports and debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Adapters to report on (e.g. 0,2-3 or all)
    #[arg(short, long, value_name = "LIST", value_parser = parse_adapter_list)]
    adapters: Option<AdapterSelector>,

    /// Overdrive parameters, name[:[ADAPTERS][:INDEX]]=VALUE
    #[arg(value_name = "PARAM")]
    params: Vec<String>,
}

const PARAM_HELP: &str = "\
Parameters:
  coreclk[:[ADAPTERS][:LEVEL]]=CLOCK    core clock in MHz
  memclk[:[ADAPTERS][:LEVEL]]=CLOCK     memory clock in MHz
  vcore[:[ADAPTERS][:LEVEL]]=VOLTAGE    Vddc voltage in volts
  icoreclk[:ADAPTERS]=CLOCK             core clock in MHz for the idle level
  imemclk[:ADAPTERS]=CLOCK              memory clock in MHz for the idle level
  ivcore[:ADAPTERS]=VOLTAGE             Vddc voltage in volts for the idle level
  fanspeed[:[ADAPTERS][:THID]]=PERCENT  fan speed in percent
  pwrctrl[:[ADAPTERS][:THID]]=PERCENT   power control in percent (-50 to +20)
VALUE may be 'default'; for fanspeed it restores automatic control.
ADAPTERS is a list like 0,1-3 or 'all' (default 0). LEVEL defaults to the last level, THID must be 0.";

fn main() {
    if let Err(e) = run() {
        match e.downcast_ref::<OvcError>() {
            Some(ovc @ (OvcError::BackendUnavailable(_)
            | OvcError::Backend(_)
            | OvcError::PermissionDenied(_)
            | OvcError::Config(_))) => {
                eprintln!("{:#}", e);
                print_error_with_solution(ovc);
            }
            _ => eprintln!("{} {:#}", style("Error:").red().bold(), e),
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let requests = match parse_params(&cli.params) {
        Ok(requests) => requests,
        Err(errors) => {
            for error in &errors {
                eprintln!("{error}");
            }
            return Err(OvcError::InvalidParameters(errors.len()).into());
        }
    };

    let config = Config::load();
    let verbose = cli.verbose || config.verbose;
    logger::init_logging(verbose);

    let backend = SysfsBackend::new(&config.drm_root, BaselineStore::new(config.state_dir()))
        .context("Failed to open the amdgpu interface")?;
    let session = OverdriveSession::open(Arc::new(backend))?;

    if let Some(selector) = &cli.adapters {
        if let Some(index) = selector.first_out_of_range(session.active_count()) {
            return Err(OvcError::AdapterOutOfRange(index))
                .context("Some adapter indices out of range");
        }
    }

    if requests.is_empty() {
        let selector = cli.adapters.unwrap_or(AdapterSelector::All);
        let text = if verbose {
            report::verbose_report(&session, &selector)?
        } else {
            report::short_report(&session, &selector)?
        };
        print!("{text}");
        return Ok(());
    }

    if config.show_notice {
        println!("{}", report::notice());
    }

    let snapshot =
        CapabilitySnapshot::capture(&session).context("Failed to read Overdrive capabilities")?;
    let batch = match validate(snapshot, requests) {
        Ok(batch) => batch,
        Err(rejected) => {
            for error in &rejected.errors {
                eprintln!("{error}");
            }
            return Err(OvcError::ValidationFailed(rejected.errors.len()).into());
        }
    };

    let plan = ApplyPlan::build(batch);
    for announcement in plan.announcements() {
        println!("{announcement}");
    }
    for warning in plan.warnings() {
        eprintln!("{} {}", style("Warning:").yellow().bold(), warning);
    }
    plan.execute(&session)
        .context("Failed to apply Overdrive parameters")?;

    Ok(())
}
