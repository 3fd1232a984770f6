use std::path::PathBuf;

use anyhow::Result;

use footdata_warehouse::config::Settings;
use footdata_warehouse::form;
use footdata_warehouse::warehouse;

fn main() -> Result<()> {
    let settings = Settings::load();
    let db_path = parse_db_path_arg().unwrap_or_else(|| settings.db_path.clone());

    let mut conn = warehouse::open_db(&db_path)?;
    let form_rows = form::rebuild_team_form(&mut conn)?;

    println!("Metrics refresh complete");
    println!("DB: {}", db_path.display());
    println!("Team form rows: {form_rows}");
    Ok(())
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db"
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}
