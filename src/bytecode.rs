//! JVM opcodes understood by the interpreter.
use std::fmt;

/// Declares the `OPCode` enum along with its byte encoding, mnemonic and
/// the width in bytes of the full instruction (opcode plus operands).
macro_rules! opcodes {
    ($($name:ident = $byte:literal, $mnemonic:literal, $width:literal;)*) => {
        /// Supported subset of the JVM instruction set.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OPCode {
            $($name = $byte,)*
        }

        impl OPCode {
            /// Every supported opcode, in encoding order.
            pub const ALL: &'static [OPCode] = &[$(OPCode::$name,)*];

            /// Returns the mnemonic used by `javap`.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(OPCode::$name => $mnemonic,)*
                }
            }

            /// Returns the width of the instruction in bytes.
            pub const fn width(self) -> usize {
                match self {
                    $(OPCode::$name => $width,)*
                }
            }
        }

        impl TryFrom<u8> for OPCode {
            type Error = u8;

            fn try_from(byte: u8) -> Result<Self, Self::Error> {
                match byte {
                    $($byte => Ok(OPCode::$name),)*
                    other => Err(other),
                }
            }
        }
    };
}

opcodes! {
    NOP = 0x00, "nop", 1;
    IconstM1 = 0x02, "iconst_m1", 1;
    Iconst0 = 0x03, "iconst_0", 1;
    Iconst1 = 0x04, "iconst_1", 1;
    Iconst2 = 0x05, "iconst_2", 1;
    Iconst3 = 0x06, "iconst_3", 1;
    Iconst4 = 0x07, "iconst_4", 1;
    Iconst5 = 0x08, "iconst_5", 1;
    BiPush = 0x10, "bipush", 2;
    SiPush = 0x11, "sipush", 3;
    Ldc = 0x12, "ldc", 2;
    ILoad = 0x15, "iload", 2;
    ALoad = 0x19, "aload", 2;
    ILoad0 = 0x1a, "iload_0", 1;
    ILoad1 = 0x1b, "iload_1", 1;
    ILoad2 = 0x1c, "iload_2", 1;
    ILoad3 = 0x1d, "iload_3", 1;
    ALoad0 = 0x2a, "aload_0", 1;
    ALoad1 = 0x2b, "aload_1", 1;
    ALoad2 = 0x2c, "aload_2", 1;
    ALoad3 = 0x2d, "aload_3", 1;
    IALoad = 0x2e, "iaload", 1;
    IStore = 0x36, "istore", 2;
    AStore = 0x3a, "astore", 2;
    IStore0 = 0x3b, "istore_0", 1;
    IStore1 = 0x3c, "istore_1", 1;
    IStore2 = 0x3d, "istore_2", 1;
    IStore3 = 0x3e, "istore_3", 1;
    AStore0 = 0x4b, "astore_0", 1;
    AStore1 = 0x4c, "astore_1", 1;
    AStore2 = 0x4d, "astore_2", 1;
    AStore3 = 0x4e, "astore_3", 1;
    IAStore = 0x4f, "iastore", 1;
    Dup = 0x59, "dup", 1;
    IAdd = 0x60, "iadd", 1;
    ISub = 0x64, "isub", 1;
    IMul = 0x68, "imul", 1;
    IDiv = 0x6c, "idiv", 1;
    IRem = 0x70, "irem", 1;
    INeg = 0x74, "ineg", 1;
    IShl = 0x78, "ishl", 1;
    IShr = 0x7a, "ishr", 1;
    IUShr = 0x7c, "iushr", 1;
    IAnd = 0x7e, "iand", 1;
    IOr = 0x80, "ior", 1;
    IXor = 0x82, "ixor", 1;
    IInc = 0x84, "iinc", 3;
    IfEq = 0x99, "ifeq", 3;
    IfNe = 0x9a, "ifne", 3;
    IfLt = 0x9b, "iflt", 3;
    IfGe = 0x9c, "ifge", 3;
    IfGt = 0x9d, "ifgt", 3;
    IfLe = 0x9e, "ifle", 3;
    IfICmpEq = 0x9f, "if_icmpeq", 3;
    IfICmpNe = 0xa0, "if_icmpne", 3;
    IfICmpLt = 0xa1, "if_icmplt", 3;
    IfICmpGe = 0xa2, "if_icmpge", 3;
    IfICmpGt = 0xa3, "if_icmpgt", 3;
    IfICmpLe = 0xa4, "if_icmple", 3;
    Goto = 0xa7, "goto", 3;
    IReturn = 0xac, "ireturn", 1;
    AReturn = 0xb0, "areturn", 1;
    Return = 0xb1, "return", 1;
    GetStatic = 0xb2, "getstatic", 3;
    InvokeVirtual = 0xb6, "invokevirtual", 3;
    InvokeStatic = 0xb8, "invokestatic", 3;
    NewArray = 0xbc, "newarray", 2;
    ArrayLength = 0xbe, "arraylength", 1;
}

impl From<OPCode> for u8 {
    fn from(opcode: OPCode) -> u8 {
        opcode as u8
    }
}

impl fmt::Display for OPCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Integer comparison predicate shared by the `if<cond>` and
/// `if_icmp<cond>` branch families.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Comparison {
    /// Evaluates `lhs <cond> rhs`.
    pub const fn holds(self, lhs: i32, rhs: i32) -> bool {
        match self {
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Le => lhs <= rhs,
        }
    }
}

impl OPCode {
    /// Predicate of a single operand branch (`ifeq` .. `ifle`), which
    /// compares the top of stack against zero.
    pub const fn unary_comparison(self) -> Option<Comparison> {
        match self {
            OPCode::IfEq => Some(Comparison::Eq),
            OPCode::IfNe => Some(Comparison::Ne),
            OPCode::IfLt => Some(Comparison::Lt),
            OPCode::IfGe => Some(Comparison::Ge),
            OPCode::IfGt => Some(Comparison::Gt),
            OPCode::IfLe => Some(Comparison::Le),
            _ => None,
        }
    }

    /// Predicate of a two operand branch (`if_icmpeq` .. `if_icmple`).
    pub const fn binary_comparison(self) -> Option<Comparison> {
        match self {
            OPCode::IfICmpEq => Some(Comparison::Eq),
            OPCode::IfICmpNe => Some(Comparison::Ne),
            OPCode::IfICmpLt => Some(Comparison::Lt),
            OPCode::IfICmpGe => Some(Comparison::Ge),
            OPCode::IfICmpGt => Some(Comparison::Gt),
            OPCode::IfICmpLe => Some(Comparison::Le),
            _ => None,
        }
    }

    /// Whether the instruction carries a signed 16-bit branch offset.
    pub const fn is_branch(self) -> bool {
        matches!(self, OPCode::Goto)
            || self.unary_comparison().is_some()
            || self.binary_comparison().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for opcode in OPCode::ALL {
            let byte = u8::from(*opcode);
            assert_eq!(OPCode::try_from(byte), Ok(*opcode));
        }
    }

    #[test]
    fn unsupported_bytes_are_rejected() {
        // lconst_0, fadd and athrow are all outside the supported subset.
        for byte in [0x09u8, 0x62, 0xbf, 0xff] {
            assert_eq!(OPCode::try_from(byte), Err(byte));
        }
    }

    #[test]
    fn instruction_widths() {
        assert_eq!(OPCode::Iconst3.width(), 1);
        assert_eq!(OPCode::BiPush.width(), 2);
        assert_eq!(OPCode::SiPush.width(), 3);
        assert_eq!(OPCode::IInc.width(), 3);
        assert_eq!(OPCode::NewArray.width(), 2);
        assert!(OPCode::ALL
            .iter()
            .filter(|op| op.is_branch())
            .all(|op| op.width() == 3));
    }

    #[test]
    fn branch_predicates() {
        assert_eq!(OPCode::IfLe.unary_comparison(), Some(Comparison::Le));
        assert_eq!(OPCode::IfLe.binary_comparison(), None);
        assert_eq!(OPCode::IfICmpGt.binary_comparison(), Some(Comparison::Gt));
        assert!(Comparison::Ge.holds(0, 0));
        assert!(!Comparison::Lt.holds(i32::MAX, i32::MIN));
        assert!(!OPCode::IAdd.is_branch());
        assert!(OPCode::Goto.is_branch());
    }
}
