use std::fmt;

/// Formats a byte slice as contiguous upper-case hex digits. The alternate flag (`{:#}`) adds a
/// `0x` prefix.
///
/// # Examples
///
/// ```rust
/// use omapboot::Hex;
///
/// assert_eq!(format!("{}", Hex(&[0x44, 0x30])), "4430");
/// assert_eq!(format!("{:#}", Hex(&[0xde, 0xad])), "0xDEAD");
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.write_str("0x")?;
        }
        for byte in self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}
