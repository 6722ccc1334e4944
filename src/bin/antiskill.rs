use anyhow::Result;

fn main() -> Result<()> {
    antiskill::cli::run()
}
