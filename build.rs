fn main() {
    // Host builds (tests, simulation) have no ESP-IDF sysenv to forward.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
