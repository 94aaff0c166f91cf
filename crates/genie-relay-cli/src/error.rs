use colored::Colorize;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let msg = err.to_string();

    if msg.contains("TELEGRAM_BOT_TOKEN") || msg.contains("WEB_APP_VERIFY_ENDPOINT") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Set it in a .env file next to the binary or export it, e.g.:");
        eprintln!(
            "  {} export TELEGRAM_BOT_TOKEN=<token from @BotFather>",
            "$".dimmed()
        );
    }

    let lower = msg.to_lowercase();
    if lower.contains("address already in use") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Pick another port with --port or PORT.");
    }

    if lower.contains("connection refused") || lower.contains("network") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Check your internet connection and try again.");
    }

    std::process::exit(1);
}
