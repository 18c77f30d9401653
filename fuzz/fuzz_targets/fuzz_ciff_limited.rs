#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = caff_parse::DecodeConfig::default().with_max_content_size(1 << 20);
    let mut input = std::io::Cursor::new(data);
    if let Ok(image) = caff_parse::read_ciff_with_config(&mut input, &config) {
        assert!(image.content_size <= 1 << 20);
        assert_eq!(image.content_size, image.width * image.height * 3);
    }
});
