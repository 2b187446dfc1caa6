use anyhow::Result;

fn main() -> Result<()> {
    grepai::app::run()
}
