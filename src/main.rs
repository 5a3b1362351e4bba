fn main() -> anyhow::Result<()> {
    meetup::cli::run()
}
