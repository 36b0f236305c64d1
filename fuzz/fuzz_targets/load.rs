#![no_main]

use libfuzzer_sys::fuzz_target;
use fy_yaml::{Document, Parser};

fuzz_target!(|data: &[u8]| fuzz_target(data));

fn fuzz_target(mut data: &[u8]) {
    let mut parser = Parser::new();
    parser.set_input(&mut data);
    let _ = Document::load(&mut parser);
}
