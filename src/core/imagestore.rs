// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Image store with hex/bin output helpers.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

const LINE_LIMIT: usize = 32;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImageStore {
    bytes: BTreeMap<u32, u8>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_entries(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn store(&mut self, addr: u32, val: u8) {
        self.bytes.insert(addr, val);
    }

    pub fn store_slice(&mut self, addr: u32, values: &[u8]) {
        for (ix, val) in values.iter().enumerate() {
            self.store(addr.wrapping_add(ix as u32), *val);
        }
    }

    pub fn get(&self, addr: u32) -> Option<u8> {
        self.bytes.get(&addr).copied()
    }

    pub fn output_range(&self) -> Option<(u32, u32)> {
        let first = self.bytes.keys().next()?;
        let last = self.bytes.keys().next_back()?;
        Some((*first, *last))
    }

    /// Bytes from the lowest to the highest written address, gaps zero-filled.
    pub fn to_binary(&self) -> Vec<u8> {
        let Some((start, end)) = self.output_range() else {
            return Vec::new();
        };
        let mut mem = vec![0u8; (end - start) as usize + 1];
        for (addr, val) in &self.bytes {
            mem[(addr - start) as usize] = *val;
        }
        mem
    }

    pub fn write_bin_file<W: Write>(&self, mut out: W) -> io::Result<()> {
        out.write_all(&self.to_binary())
    }

    /// Contiguous runs of written bytes, in address order.
    fn runs(&self) -> Vec<(u32, Vec<u8>)> {
        let mut runs: Vec<(u32, Vec<u8>)> = Vec::new();
        for (addr, val) in &self.bytes {
            match runs.last_mut() {
                Some((start, data)) if *start + data.len() as u32 == *addr => data.push(*val),
                _ => runs.push((*addr, vec![*val])),
            }
        }
        runs
    }

    pub fn write_hex_file<W: Write>(&self, mut out: W) -> io::Result<()> {
        for (start, data) in self.runs() {
            for (ix, chunk) in data.chunks(LINE_LIMIT).enumerate() {
                let line_addr = start + (ix * LINE_LIMIT) as u32;
                let Ok(line_addr) = u16::try_from(line_addr) else {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Address {line_addr:X}H out of 16-bit range"),
                    ));
                };
                write!(out, "{}\r\n", hex_record(line_addr, chunk))?;
            }
        }
        write!(out, ":00000001FF\r\n")?;
        Ok(())
    }

    /// Read Intel HEX data records back into a store.
    pub fn read_hex<R: BufRead>(input: R) -> io::Result<Self> {
        let mut image = Self::new();
        for line in input.lines() {
            let line = line?;
            let record = line.trim();
            if record.is_empty() {
                continue;
            }
            let bytes = decode_record(record)?;
            let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            if sum != 0 {
                return Err(invalid(record, "checksum mismatch"));
            }
            let len = bytes[0] as usize;
            if bytes.len() != len + 5 {
                return Err(invalid(record, "length mismatch"));
            }
            let addr = u32::from(u16::from_be_bytes([bytes[1], bytes[2]]));
            match bytes[3] {
                0x00 => image.store_slice(addr, &bytes[4..4 + len]),
                0x01 => break,
                _ => return Err(invalid(record, "unsupported record type")),
            }
        }
        Ok(image)
    }
}

fn hex_record(addr: u16, data: &[u8]) -> String {
    let mut record = format!(":{:02X}{addr:04X}00", data.len());
    let mut checksum = (data.len() as u8)
        .wrapping_add((addr >> 8) as u8)
        .wrapping_add((addr & 0xff) as u8);
    for val in data {
        record.push(hex_digit((val >> 4) & 0x0f));
        record.push(hex_digit(val & 0x0f));
        checksum = checksum.wrapping_add(*val);
    }
    checksum = (!checksum).wrapping_add(1);
    record.push_str(&format!("{checksum:02X}"));
    record
}

fn decode_record(record: &str) -> io::Result<Vec<u8>> {
    let digits = record
        .strip_prefix(':')
        .ok_or_else(|| invalid(record, "record must start with ':'"))?;
    if digits.len() % 2 != 0 || digits.len() < 10 || !digits.is_ascii() {
        return Err(invalid(record, "malformed record"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|ix| {
            u8::from_str_radix(&digits[ix..ix + 2], 16)
                .map_err(|_| invalid(record, "invalid hex digit"))
        })
        .collect()
}

fn invalid(record: &str, msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{msg}: {record}"))
}

fn hex_digit(val: u8) -> char {
    match val {
        0..=9 => (b'0' + val) as char,
        _ => (b'A' + (val - 10)) as char,
    }
}

#[cfg(test)]
mod tests {
    use super::ImageStore;
    use proptest::prelude::*;

    fn parse_hex_byte(s: &str) -> u8 {
        u8::from_str_radix(s, 16).unwrap()
    }

    fn verify_checksum(line: &str) {
        assert!(line.starts_with(':'), "record must start with ':'");
        let bytes = &line[1..];
        let len = parse_hex_byte(&bytes[0..2]) as usize;
        let data_end = 8 + len * 2;
        let mut sum: u8 = 0;
        for idx in (0..data_end).step_by(2) {
            sum = sum.wrapping_add(parse_hex_byte(&bytes[idx..idx + 2]));
        }
        let checksum = parse_hex_byte(&bytes[data_end..data_end + 2]);
        assert_eq!(checksum, (!sum).wrapping_add(1), "checksum mismatch for {line}");
    }

    fn hex_text(image: &ImageStore) -> String {
        let mut out = Vec::new();
        image.write_hex_file(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn writes_known_record() {
        let mut image = ImageStore::new();
        image.store_slice(0x0100, &[0xAF, 0xC9]);
        assert_eq!(hex_text(&image), ":02010000AFC985\r\n:00000001FF\r\n");
    }

    #[test]
    fn splits_records_at_limit_and_gaps() {
        let mut image = ImageStore::new();
        image.store_slice(0x1000, &[0x55; 40]);
        image.store(0x2000, 0x01);
        let text = hex_text(&image);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with(":20100000"));
        assert!(lines[1].starts_with(":08102000"));
        assert!(lines[2].starts_with(":01200000"));
        for line in &lines {
            verify_checksum(line);
        }
        assert_eq!(lines.last().copied(), Some(":00000001FF"));
    }

    #[test]
    fn binary_fills_gaps_with_zero() {
        let mut image = ImageStore::new();
        image.store(0x0010, 0xaa);
        image.store(0x0012, 0xbb);
        assert_eq!(image.to_binary(), vec![0xaa, 0x00, 0xbb]);
        assert!(ImageStore::new().to_binary().is_empty());
    }

    #[test]
    fn rejects_bad_checksum() {
        let text = ":02010000AFC986\r\n";
        assert!(ImageStore::read_hex(text.as_bytes()).is_err());
    }

    proptest! {
        #[test]
        fn hex_round_trip(
            start in 0u32..0x8000,
            data in proptest::collection::vec(any::<u8>(), 0..200),
        ) {
            let mut image = ImageStore::new();
            image.store_slice(start, &data);
            let text = hex_text(&image);
            let decoded = ImageStore::read_hex(text.as_bytes()).unwrap();
            prop_assert_eq!(decoded.to_binary(), data.clone());
            prop_assert_eq!(decoded, image);
        }
    }
}
