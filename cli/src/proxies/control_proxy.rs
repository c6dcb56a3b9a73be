use zbus::{Result, proxy};
#[proxy(
    default_service = "io.atgd",
    interface = "io.atgd.control",
    default_path = "/io/atgd/control"
)]
pub trait Control {
    async fn run_self_test(&self) -> Result<String>;
    async fn trigger_interrupts(&self) -> Result<String>;
}
