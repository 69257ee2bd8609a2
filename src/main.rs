use anyhow::Result;

fn main() -> Result<()> {
    docket::run()?;
    Ok(())
}
