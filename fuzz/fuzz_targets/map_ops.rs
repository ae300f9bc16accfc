#![no_main]

use libfuzzer_sys::fuzz_target;
use muestreo::lock_free_map::LockFreeMap;

fuzz_target!(|data: &[u8]| {
    // Decode the input as an operation stream: 3 bytes per op
    // (opcode, key, value). The map must uphold used <= dirty <= capacity
    // and never panic for any sequence.
    let map = LockFreeMap::with_capacity(4);
    for chunk in data.chunks_exact(3) {
        let key = u64::from(chunk[1]) + 1;
        let value = u64::from(chunk[2]) + 1;
        match chunk[0] % 3 {
            0 => {
                let _ = map.put(key, value);
            }
            1 => {
                let _ = map.get(key);
            }
            _ => {
                let _ = map.remove(key);
            }
        }
        let used = map.approx_used();
        let dirty = map.approx_dirty();
        assert!(used <= dirty && dirty <= map.capacity());
    }
});
