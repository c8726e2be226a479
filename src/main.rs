use clap::Parser;
use tracing_subscriber::EnvFilter;

use ailua::cli::{build_backend, Args};
use ailua::{Console, Repl};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let llm = build_backend(&args)?;
    let console = Console::new(llm, args.ctx_history_count)?;

    println!(
        "ailua {} — {}",
        env!("CARGO_PKG_VERSION"),
        console.describe_backend()
    );
    println!("Type Lua, or prefix a prompt with 'ai:' ('ai!' for agent mode). :help for commands.");

    let mut repl = Repl::new(console)?;
    repl.run()
}

// Terminal filter: --debug > RUST_LOG env > default "warn". External HTTP
// crates are clamped to WARN so debug runs stay readable.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug,hyper=warn,h2=warn,reqwest=warn,rustls=warn,tokio=warn,rustyline=warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();
}
