use anyhow::{Result, bail};
use runtime::imports::IMPORTS;

pub fn print(group: Option<&str>) -> Result<()> {
    if let Some(group) = group {
        if !IMPORTS.iter().any(|import| import.group == group) {
            bail!("unknown import group `{group}`");
        }
    }

    let mut current = "";
    for import in IMPORTS
        .iter()
        .filter(|import| group.is_none_or(|group| import.group == group))
    {
        if import.group != current {
            if !current.is_empty() {
                println!();
            }
            println!("{}", import.group);
            current = import.group;
        }
        println!("  {import}");
    }
    Ok(())
}
