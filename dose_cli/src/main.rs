use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use dose_core::adherence::{export_csv, summarize};
use dose_core::*;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dosewatch")]
#[command(about = "Medication reminder scheduling and escalation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Evaluate as if the current time were this RFC 3339 instant
    #[arg(long, global = true)]
    now: Option<DateTime<Utc>>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user
    Register {
        /// User key, normally the phone number
        #[arg(long)]
        user: String,

        #[arg(long)]
        name: String,

        /// Phone number (defaults to the user key)
        #[arg(long)]
        phone: Option<String>,

        /// Wake time, HH:MM or h:mm AM/PM
        #[arg(long, default_value = "")]
        wake: String,

        /// Sleep time, HH:MM or h:mm AM/PM
        #[arg(long, default_value = "")]
        sleep: String,

        /// IANA timezone name
        #[arg(long, default_value = "")]
        timezone: String,
    },

    /// Add a prescription and schedule it
    AddPrescription {
        #[arg(long)]
        user: String,

        #[arg(long)]
        name: String,

        /// Person taking the medication (defaults to the user's name)
        #[arg(long)]
        person: Option<String>,

        /// Pills per dose
        #[arg(long, default_value_t = 1)]
        dosage: u32,

        #[arg(long)]
        per_day: u8,

        /// Pills on hand
        #[arg(long)]
        count: u32,

        /// Free-text instructions, e.g. "after breakfast"
        #[arg(long, default_value = "")]
        instructions: String,
    },

    /// Add a caregiver watching one or more persons
    AddCaregiver {
        #[arg(long)]
        user: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        phone: String,

        /// Person to watch (repeatable)
        #[arg(long = "watch", required = true)]
        watched: Vec<String>,
    },

    /// Set or toggle the reminder channel
    Channel {
        #[arg(long)]
        user: String,

        /// Omit to toggle between text and call
        #[arg(value_enum)]
        channel: Option<ChannelArg>,
    },

    /// Pause or resume reminders for one prescription
    SetReminders {
        #[arg(long)]
        user: String,

        #[arg(long)]
        prescription: String,

        #[arg(long)]
        off: bool,
    },

    /// Change a user's account status
    Status {
        #[arg(long)]
        user: String,

        /// active, paused or inactive
        status: UserStatus,
    },

    /// Regenerate a user's future schedule
    Rebuild {
        #[arg(long)]
        user: String,
    },

    /// Run reminders, escalations and inventory checks for every user
    Tick,

    /// Create and send due reminders
    Reminders,

    /// Advance unanswered reminders along the escalation timeline
    Escalate,

    /// Run refill and end-of-course checks
    Inventory,

    /// Answer a reminder
    Confirm {
        #[arg(long)]
        user: String,

        /// taken or skipped
        outcome: Outcome,

        #[arg(long, conflicts_with = "latest", required_unless_present = "latest")]
        notification: Option<Uuid>,

        /// Answer the most recent pending reminder
        #[arg(long)]
        latest: bool,
    },

    /// Feed an inbound text reply
    Reply {
        #[arg(long)]
        user: String,

        text: String,
    },

    /// Feed keypad digits or speech from an interactive call
    CallInput {
        #[arg(long)]
        user: String,

        #[arg(default_value = "")]
        digits: String,

        #[arg(long, default_value = "")]
        speech: String,

        /// Notification the call was placed for
        #[arg(long)]
        notification: Option<Uuid>,
    },

    /// Start a fresh course of a prescription
    Restock {
        #[arg(long)]
        user: String,

        #[arg(long)]
        prescription: String,

        #[arg(long)]
        count: u32,
    },

    /// Show a user's prescriptions, schedule and reminders
    Show {
        #[arg(long)]
        user: String,
    },

    /// Adherence summary, optionally exported as CSV
    Report {
        #[arg(long)]
        user: String,

        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Tick in the foreground every `daemon.tick_seconds`
    Run {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    Text,
    Call,
}

impl From<ChannelArg> for DeliveryChannel {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Text => DeliveryChannel::Text,
            ChannelArg::Call => DeliveryChannel::Call,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    dose_core::logging::init(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    std::fs::create_dir_all(&data_dir)?;

    let fixed_now = cli.now;
    let now = || fixed_now.unwrap_or_else(Utc::now);

    let channel = Arc::new(OutboxChannel::new(
        data_dir.join("outbox.jsonl"),
        config.channel.calls_enabled,
    ));
    let engine = ReminderEngine::new(FileStore::new(&data_dir), channel, config);

    match cli.command {
        Commands::Register {
            user,
            name,
            phone,
            wake,
            sleep,
            timezone,
        } => {
            let phone = phone.unwrap_or_else(|| user.clone());
            let mut aggregate = UserAggregate::new(&user, &name, &phone, now());
            aggregate.wake_time = wake;
            aggregate.sleep_time = sleep;
            aggregate.timezone = timezone;
            engine.register_user(aggregate)?;
            println!("✓ Registered {} ({})", name, user);
        }

        Commands::AddPrescription {
            user,
            name,
            person,
            dosage,
            per_day,
            count,
            instructions,
        } => {
            let person = match person {
                Some(person) => person,
                None => engine.load_user(&user)?.name,
            };
            let prescription =
                Prescription::new(&name, &person, dosage, per_day, count, &instructions);
            let added = engine.add_prescription(&user, prescription, now())?;
            println!("✓ Added {} for {}", name, person);
            println!("  Scheduled {} doses", added);
        }

        Commands::AddCaregiver {
            user,
            name,
            phone,
            watched,
        } => {
            engine.add_caregiver(
                &user,
                Caregiver {
                    name: name.clone(),
                    phone,
                    watched_persons: watched.clone(),
                    notifications_enabled: true,
                },
            )?;
            println!("✓ {} now watches {}", name, watched.join(", "));
        }

        Commands::Channel { user, channel } => {
            let channel = engine.set_channel(&user, channel.map(DeliveryChannel::from))?;
            println!("✓ Reminders for {} go by {:?}", user, channel);
        }

        Commands::SetReminders {
            user,
            prescription,
            off,
        } => {
            let added = engine.set_reminders(&user, &prescription, !off, now())?;
            let state = if off { "paused" } else { "resumed" };
            println!("✓ Reminders {} for {} ({} doses scheduled)", state, prescription, added);
        }

        Commands::Status { user, status } => {
            let added = engine.set_status(&user, status, now())?;
            println!("✓ {} is now {:?} ({} doses scheduled)", user, status, added);
        }

        Commands::Rebuild { user } => {
            let added = engine.rebuild_schedule(&user, now())?;
            println!("✓ Rebuilt schedule for {}: {} doses", user, added);
        }

        Commands::Tick => print_tick("Tick", &engine.tick(now())),
        Commands::Reminders => print_tick("Reminders", &engine.run_due_reminders(now())),
        Commands::Escalate => print_tick("Escalation", &engine.run_escalations(now())),
        Commands::Inventory => print_tick("Inventory", &engine.run_inventory_checks(now())),

        Commands::Confirm {
            user,
            outcome,
            notification,
            latest,
        } => {
            let confirmation = match notification {
                Some(id) if !latest => engine.apply_confirmation(&user, id, outcome, now())?,
                _ => engine.confirm_latest(&user, outcome, now())?,
            };
            print_confirmation(&confirmation);
        }

        Commands::Reply { user, text } => match engine.handle_text_reply(&user, &text, now())? {
            Some(confirmation) => print_confirmation(&confirmation),
            None => println!("Reply not understood. Send D for taken or S to skip."),
        },

        Commands::CallInput {
            user,
            digits,
            speech,
            notification,
        } => match engine.handle_call_input(&user, notification, &digits, &speech, now())? {
            Some(confirmation) => print_confirmation(&confirmation),
            None => println!("Input not understood. Press 1 for taken or 2 to skip."),
        },

        Commands::Restock {
            user,
            prescription,
            count,
        } => {
            let added = engine.restock(&user, &prescription, count, now())?;
            println!("✓ Restocked {} with {} pills", prescription, count);
            println!("  Scheduled {} doses", added);
        }

        Commands::Show { user } => display_user(&engine.load_user(&user)?, now()),

        Commands::Report { user, csv } => {
            let aggregate = engine.load_user(&user)?;
            for summary in summarize(&aggregate) {
                let rate = summary
                    .rate
                    .map(|r| format!("{:.0}%", r * 100.0))
                    .unwrap_or_else(|| "n/a".into());
                println!(
                    "  {}: {} taken, {} skipped, {} pending, adherence {}",
                    summary.prescription, summary.taken, summary.skipped, summary.pending, rate
                );
            }
            if let Some(path) = csv {
                let rows = export_csv(&aggregate, &path)?;
                println!("✓ Exported {} entries to {}", rows, path.display());
            }
        }

        Commands::Run { ticks } => {
            let interval = std::time::Duration::from_secs(engine.config().daemon.tick_seconds);
            tracing::info!("Ticking every {:?}", interval);
            let mut count = 0;
            loop {
                print_tick("Tick", &engine.tick(now()));
                count += 1;
                if ticks.is_some_and(|limit| count >= limit) {
                    break;
                }
                std::thread::sleep(interval);
            }
        }
    }

    Ok(())
}

fn print_tick(label: &str, report: &TickReport) {
    println!("✓ {} complete: {} users", label, report.users_processed);
    println!("  Reminders created: {}", report.notifications_created);
    if report.stale_closed > 0 {
        println!("  Closed as too late: {}", report.stale_closed);
    }
    if report.schedules_rebuilt > 0 {
        println!("  Schedules rebuilt: {}", report.schedules_rebuilt);
    }
    println!("  Resends: {}", report.resends);
    println!("  Auto-skipped: {}", report.auto_skipped);
    println!(
        "  Refill notices: {}, course notices: {}",
        report.refill_notices, report.course_notices
    );
    if report.caregivers_alerted > 0 {
        println!("  Caregivers alerted: {}", report.caregivers_alerted);
    }
    if report.errors > 0 {
        println!("  Errors: {}", report.errors);
    }
}

fn print_confirmation(confirmation: &Confirmation) {
    match confirmation {
        Confirmation::Applied {
            outcome,
            medications,
            ..
        } => println!("✓ Marked {:?}: {}", outcome, medications.join(", ")),
        Confirmation::AlreadyResolved { status, .. } => {
            println!("Reminder was already answered ({:?})", status)
        }
        Confirmation::NothingPending {
            last_status: Some(status),
            last_medications,
        } => println!(
            "No pending reminder. Last reminder ({}) was {:?}",
            last_medications.join(", "),
            status
        ),
        Confirmation::NothingPending {
            last_status: None, ..
        } => println!("No pending reminder"),
    }
}

fn display_user(user: &UserAggregate, now: DateTime<Utc>) {
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  {} ({})", user.name, user.key);
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  Status: {:?}", user.status);
    println!("  Channel: {:?}", user.channel);
    println!();

    for p in &user.prescriptions {
        let paused = if p.reminders_enabled { "" } else { " [paused]" };
        println!(
            "  {} for {}: {} x{}/day, {} pills left{}",
            p.name, p.assigned_person, p.dosage, p.doses_per_day, p.ledger.pill_count, paused
        );
    }

    let upcoming: Vec<&ScheduleEntry> = user
        .schedule
        .iter()
        .filter(|e| e.status == EntryStatus::Pending && e.scheduled_at > now)
        .take(5)
        .collect();
    if !upcoming.is_empty() {
        println!();
        println!("  Upcoming:");
        for entry in upcoming {
            println!("  → {} {}", entry.scheduled_at.to_rfc3339(), entry.prescription);
        }
    }

    let pending: Vec<&Notification> = user
        .notifications
        .iter()
        .filter(|n| n.status == NotificationStatus::Pending)
        .collect();
    if !pending.is_empty() {
        println!();
        println!("  Awaiting answer:");
        for n in pending {
            println!("  → {} {} (resent {}x)", n.id, n.medications.join(", "), n.resend_count);
        }
    }

    println!();
}
