use anyhow::Result;

fn main() -> Result<()> {
    compilebox::cli::run()
}
