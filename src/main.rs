fn main() -> anyhow::Result<()> {
    twhighlight_lib::run()
}
