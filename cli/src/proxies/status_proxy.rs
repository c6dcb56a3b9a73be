use zbus::{Result, proxy};
#[proxy(
    default_service = "io.atgd",
    interface = "io.atgd.status",
    default_path = "/io/atgd/status"
)]
pub trait Status {
    async fn get_device(&self) -> Result<(String, u16, u16, String)>;
    async fn get_dev_no(&self) -> Result<String>;
    async fn get_self_test_count(&self) -> Result<u64>;
    async fn get_interrupt_counter(&self) -> Result<u32>;
    async fn get_interrupt_counts(&self) -> Result<Vec<u64>>;
}
