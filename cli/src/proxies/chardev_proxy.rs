use zbus::{Result, proxy};
#[proxy(
    default_service = "io.atgd",
    interface = "io.atgd.chardev",
    default_path = "/io/atgd/chardev"
)]
pub trait Chardev {
    async fn open(&self) -> Result<u64>;
    async fn release(&self, session: u64) -> Result<()>;
    async fn read(&self, session: u64, count: u32) -> Result<Vec<u8>>;
    async fn write(&self, session: u64, data: &[u8]) -> Result<u32>;
}
