use serde_json::json;

use stash_sorter::classifier::Classifier;
use stash_sorter::config::Config;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: classify_item <item.txt> [item2.txt ...]");
        eprintln!("Item lists come from the file named by SORTER_CONFIG (default sorter.json).");
        std::process::exit(1);
    }

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    let mut classifier = Classifier::new(&config.items);

    for path in &args[1..] {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Failed to read {path}: {e}");
                continue;
            }
        };

        let result = classifier.evaluate(&text);
        let calibrated = result.destination.map(|d| {
            !d.needs_tab_switch() || config.tab(d.label()).is_some_and(|t| t.is_calibrated())
        });
        let line = json!({
            "file": path,
            "destination": result.destination,
            "tab_calibrated": calibrated,
            "flags": result.flags,
        });
        println!("{line}");
    }
}
