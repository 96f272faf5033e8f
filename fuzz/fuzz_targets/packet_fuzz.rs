#![no_main]
use libfuzzer_sys::fuzz_target;
use mountr::Packet;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut stream = Cursor::new(data);
    // Framed reads must never panic on arbitrary bytes; a parsed packet
    // must survive re-encoding.
    while let Ok(mut packet) = Packet::read_from(&mut stream) {
        let _ = packet.packet_type();
        let _ = packet.payload_len();
        let mut wire = Vec::new();
        let _ = packet.write_to(&mut wire);
    }
});
