#![no_main]
use libfuzzer_sys::fuzz_target;
use mountr::SessionInfo;

fuzz_target!(|data: &[u8]| {
    // Session metadata comes from a file the filesystem client writes;
    // parsing must reject everything but the two known layouts without
    // panicking.
    if let Ok(info) = SessionInfo::parse(data) {
        let _ = info.master_addr;
        let _ = info.session_id;
    }
});
