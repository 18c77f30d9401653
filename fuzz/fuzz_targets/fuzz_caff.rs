#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut input = std::io::Cursor::new(data);
    if let Ok(caff) = caff_parse::read_caff(&mut input) {
        let image = caff.image();
        assert_eq!(image.pixels.len() as u64, image.content_size);
        assert_eq!(image.caption.last(), Some(&b'\n'));
        assert!(image.tags.iter().all(|tag| tag.last() == Some(&0)));
    }
});
