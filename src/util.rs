use chrono::Local;
use std::io::Write;
use std::sync::Once;

static INIT_LOGGER_ONCE: Once = Once::new();

pub fn init() {
    INIT_LOGGER_ONCE.call_once(|| {
        dotenv::dotenv().ok();

        env_logger::builder()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} {:<5} {}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.module_path().unwrap(),
                    record.args()
                )
            })
            .init();
    })
}

pub fn u16_val(buf: &[u8], addr: usize) -> u16 {
    u16::from_le_bytes(buf[addr..addr + 2].try_into().expect("ERR_READ_VALUE_u16"))
}

pub fn u32_val(buf: &[u8], addr: usize) -> u32 {
    u32::from_le_bytes(buf[addr..addr + 4].try_into().expect("ERR_READ_VALUE_u32"))
}

pub fn u64_val(buf: &[u8], addr: usize) -> u64 {
    u64::from_le_bytes(buf[addr..addr + 8].try_into().expect("ERR_READ_VALUE_u64"))
}

pub fn i16_val(buf: &[u8], addr: usize) -> i16 {
    i16::from_le_bytes(buf[addr..addr + 2].try_into().expect("ERR_READ_VALUE_i16"))
}

pub fn i32_val(buf: &[u8], addr: usize) -> i32 {
    i32::from_le_bytes(buf[addr..addr + 4].try_into().expect("ERR_READ_VALUE_i32"))
}

pub fn i64_val(buf: &[u8], addr: usize) -> i64 {
    i64::from_le_bytes(buf[addr..addr + 8].try_into().expect("ERR_READ_VALUE_i64"))
}

pub fn f64_val(buf: &[u8], addr: usize) -> f64 {
    f64::from_le_bytes(buf[addr..addr + 8].try_into().expect("ERR_READ_VALUE_f64"))
}

/// Strip the NUL padding a fixed-width field carries on disk.
pub fn trim_nul(buf: &[u8]) -> &[u8] {
    let end = buf.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
    &buf[..end]
}

pub fn is_all_zero(buf: &[u8]) -> bool {
    buf.iter().all(|b| *b == 0)
}
