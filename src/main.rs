fn main() {
    splat_volume::cli::run();
}
