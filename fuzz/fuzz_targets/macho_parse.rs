#![no_main]
use libfuzzer_sys::fuzz_target;

use machscope::analysis::memory::read_pointer_section;
use machscope::formats::macho::MachoBinary;
use machscope::io::ByteSource;

fuzz_target!(|data: &[u8]| {
    let Ok(binary) = MachoBinary::parse(ByteSource::from_bytes(data.to_vec()), 0) else {
        return;
    };
    let _ = binary.virtual_base();
    let _ = binary.imported_symbol_slots();
    let _ = read_pointer_section(&binary, "__objc_selrefs");
    for section in binary.sections() {
        let _ = binary.section_content(&section.name);
    }
});
