//! Line-based chat loop. Reads one query per line; slash commands are
//! handled locally, anything else goes through the engine.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::Result;

use strainwise_memory::cache::CacheStats;
use strainwise_runtime::ChatEngine;

const HELP: &str = "Commands: /stats, /clear, /help, /quit";

pub(crate) async fn run(engine: ChatEngine) -> Result<()> {
    let interactive = io::stdin().is_terminal();
    if interactive {
        println!("Strainwise è online. {HELP}");
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();

    loop {
        if interactive {
            print!("> ");
            stdout.flush()?;
        }

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let query = line.trim();
        if query.is_empty() {
            continue;
        }

        match query {
            "/quit" | "/exit" => break,
            "/help" => println!("{HELP}"),
            "/clear" => {
                engine.clear_memory().await;
                println!("Memoria locale cancellata.");
            }
            "/stats" => match engine.cache_stats().await {
                Ok(stats) => print!("{}", render_stats(&stats)),
                Err(err) => eprintln!("stats unavailable: {err}"),
            },
            _ => {
                let reply = engine.process_query(query).await;
                if reply.cached {
                    println!("{}  [cache]", reply.text);
                } else {
                    println!("{}", reply.text);
                }
            }
        }
    }

    Ok(())
}

pub(crate) fn render_stats(stats: &CacheStats) -> String {
    format!(
        "queries totali: {}\nquery uniche: {}\nservite dalla cache: {} ({:.1}%)\nrisparmio stimato: {:.3} EUR\n",
        stats.total_queries,
        stats.unique_queries,
        stats.cached_queries,
        stats.hit_rate_percent(),
        stats.estimated_savings_eur(),
    )
}
