#![no_main]
use libfuzzer_sys::fuzz_target;

use machscope::formats::macho::MachoContainer;
use machscope::io::ByteSource;

fuzz_target!(|data: &[u8]| {
    if let Ok(container) = MachoContainer::parse(ByteSource::from_bytes(data.to_vec())) {
        for slice in container.slices() {
            let _ = slice.symbol_table();
        }
    }
});
