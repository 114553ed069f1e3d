mod console;
mod floodguard;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use gab_config::{NoPrompt, Prompter, StdinPrompter};
use gab_hooks::Locations;
use gab_plugin_sdk::{PluginControl, PluginHost};
use gab_types::Rank;

#[derive(Parser)]
#[command(name = "gab", about = "Plugin-driven chat bot framework")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the bot from the terminal
    Run {
        /// User the console speaks as
        #[arg(short, long, default_value = "console")]
        user: String,

        /// Rank override (user, moderator, admin); defaults to roster.ini
        #[arg(short, long)]
        rank: Option<Rank>,

        /// Ask for template values that have no default
        #[arg(long)]
        prompt: bool,
    },
    /// List the hook locations and the hooks every bundled plugin adds
    Locations {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Check system health
    Health,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { user, rank, prompt } => {
            let config = gab_config::load_config().unwrap_or_default();
            let mut prompter: Box<dyn Prompter> = if prompt {
                Box::new(StdinPrompter)
            } else {
                Box::new(NoPrompt)
            };
            let console = console::Console::new(user, rank, &config, &mut *prompter);
            let tick = Duration::from_millis(config.timers.tick_ms.max(1));
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(console.run(tick))?;
        }
        Commands::Locations { json } => {
            let mut host = PluginHost::new(Arc::new(Locations::with_standard_locations()), "!");
            host.register(gab_admin::registration());
            host.register(floodguard::registration());
            let available: Vec<String> = host.available().map(str::to_string).collect();
            for name in available {
                host.load_plugin(&name)?;
            }
            print_locations(host.locations(), json)?;
        }
        Commands::Health => {
            println!("gab is healthy");
            let config = gab_config::load_config().unwrap_or_default();
            println!("  ini dir: {}", config.ini.dir.display());
            println!("  preloaded inis: {}", config.ini.preload.join(", "));
            println!("  autoload plugins: {}", config.plugins.autoload.join(", "));
            println!("  command prefix: {}", config.commands.prefix);
            println!("  timer tick: {}ms", config.timers.tick_ms);
        }
    }

    Ok(())
}

fn print_locations(locations: &Locations<gab_types::HookEvent>, json: bool) -> anyhow::Result<()> {
    let names = locations.location_names();
    if json {
        let listing: Vec<serde_json::Value> = names
            .iter()
            .filter_map(|name| {
                let spec = locations.location(name)?;
                Some(serde_json::json!({
                    "location": spec,
                    "hooks": locations.hooks(name),
                }))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    for name in &names {
        match locations.location(name).and_then(|spec| spec.doc) {
            Some(doc) => println!("{name}\n    {doc}"),
            None => println!("{name}"),
        }
        for hook in locations.hooks(name) {
            let scope = if hook.use_global_state { "global" } else { "per user" };
            println!("    - {} ({scope}, {})", hook.name, hook.file.display());
        }
    }
    Ok(())
}
