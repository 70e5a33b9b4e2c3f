//! Lightweight implementation of a parser and decoder for JVM bytecode
//! class files.
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;
use tracing::debug;

/// Magic number every class file starts with.
pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;

/// Errors raised while decoding a class file or resolving entries of its
/// constant pool.
#[derive(Debug, Error)]
pub enum ClassFormatError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unexpected end of class file while reading {what}")]
    Truncated { what: &'static str },
    #[error("bad magic number {0:#010x}, expected 0xcafebabe")]
    BadMagic(u32),
    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: usize },
    #[error("constant pool entry {index} is not valid UTF-8")]
    InvalidUtf8 { index: usize },
    #[error("constant pool index {index} is out of range")]
    BadConstantIndex { index: usize },
    #[error("constant pool entry {index} is not a {expected}")]
    UnexpectedConstant { index: usize, expected: &'static str },
    #[error("malformed descriptor {0:?}")]
    BadDescriptor(String),
    #[error("method {name}{descriptor} not found in class")]
    UnresolvedMethod { name: String, descriptor: String },
    #[error("{0} trailing bytes after class file")]
    TrailingBytes(usize),
}

type Result<T> = std::result::Result<T, ClassFormatError>;

/// Constant pool entries, see JVMS §4.4.
///
/// Floating point constants are kept as raw bits since the interpreter has
/// no floating point support.
#[derive(Debug, Clone, PartialEq)]
pub enum CPInfo {
    /// Slot 0 and the second slot of 8-byte constants.
    Unusable,
    ConstantUtf8 {
        bytes: String,
    },
    ConstantInteger {
        bytes: i32,
    },
    ConstantFloat {
        bits: u32,
    },
    ConstantLong {
        bytes: i64,
    },
    ConstantDouble {
        bits: u64,
    },
    ConstantClass {
        name_index: u16,
    },
    ConstantString {
        string_index: u16,
    },
    ConstantFieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantInterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantNameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    ConstantMethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    ConstantMethodType {
        descriptor_index: u16,
    },
    ConstantDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    ConstantInvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    ConstantModule {
        name_index: u16,
    },
    ConstantPackage {
        name_index: u16,
    },
}

impl CPInfo {
    /// Number of pool slots the entry occupies.
    const fn slots(&self) -> usize {
        match self {
            CPInfo::ConstantLong { .. } | CPInfo::ConstantDouble { .. } => 2,
            _ => 1,
        }
    }
}

/// Constant pool indexed the same way as the class file: slot 0 is
/// unusable and the first real entry lives at index 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<CPInfo>,
}

impl ConstantPool {
    /// Builds a pool from its entries in file order, inserting the
    /// unusable slots (index 0 and after longs and doubles).
    pub fn new(entries: Vec<CPInfo>) -> Self {
        let mut pool = vec![CPInfo::Unusable];
        for entry in entries {
            let slots = entry.slots();
            pool.push(entry);
            if slots == 2 {
                pool.push(CPInfo::Unusable);
            }
        }
        Self { entries: pool }
    }

    /// Number of slots, including slot 0. Matches `constant_pool_count`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: usize) -> Result<&CPInfo> {
        match self.entries.get(index) {
            Some(CPInfo::Unusable) | None => Err(ClassFormatError::BadConstantIndex { index }),
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: usize) -> Result<&str> {
        match self.get(index)? {
            CPInfo::ConstantUtf8 { bytes } => Ok(bytes),
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    pub fn integer(&self, index: usize) -> Result<i32> {
        match self.get(index)? {
            CPInfo::ConstantInteger { bytes } => Ok(*bytes),
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "Integer",
            }),
        }
    }

    /// Resolves a `Class` entry to its binary name.
    pub fn class_name(&self, index: usize) -> Result<&str> {
        match self.get(index)? {
            CPInfo::ConstantClass { name_index } => self.utf8(*name_index as usize),
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "Class",
            }),
        }
    }

    /// Resolves a `NameAndType` entry to its `(name, descriptor)` pair.
    pub fn name_and_type(&self, index: usize) -> Result<(&str, &str)> {
        match self.get(index)? {
            CPInfo::ConstantNameAndType {
                name_index,
                descriptor_index,
            } => Ok((
                self.utf8(*name_index as usize)?,
                self.utf8(*descriptor_index as usize)?,
            )),
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolves a `Methodref` or `InterfaceMethodref` entry to the name and
    /// descriptor of the referenced method.
    pub fn method_ref(&self, index: usize) -> Result<(&str, &str)> {
        match self.get(index)? {
            CPInfo::ConstantMethodRef {
                name_and_type_index,
                ..
            }
            | CPInfo::ConstantInterfaceMethodRef {
                name_and_type_index,
                ..
            } => self.name_and_type(*name_and_type_index as usize),
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "Methodref",
            }),
        }
    }

}

/// Entry of a `Code` attribute's exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// Class, field, method and code attributes. Only `Code` is decoded, the
/// rest are kept as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeInfo {
    CodeAttribute {
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
        exception_table: Vec<ExceptionTableEntry>,
        attributes: HashMap<String, AttributeInfo>,
    },
    Raw {
        info: Vec<u8>,
    },
}

/// Field or method declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: HashMap<String, AttributeInfo>,
}

impl MemberInfo {
    pub const fn access_flags(&self) -> u16 {
        self.access_flags
    }

    pub const fn name_index(&self) -> u16 {
        self.name_index
    }

    pub const fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }

    pub const fn attributes(&self) -> &HashMap<String, AttributeInfo> {
        &self.attributes
    }
}

pub type MethodInfo = MemberInfo;

/// Decoded class file, see JVMS §4.1.
#[derive(Debug, Clone, PartialEq)]
pub struct JVMClassFile {
    minor_version: u16,
    major_version: u16,
    constant_pool: ConstantPool,
    this_class: u16,
    super_class: u16,
    methods: Vec<MethodInfo>,
}

impl JVMClassFile {
    pub const fn version(&self) -> (u16, u16) {
        (self.major_version, self.minor_version)
    }

    pub const fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    pub fn class_name(&self) -> Result<&str> {
        self.constant_pool.class_name(self.this_class as usize)
    }

    /// Binary name of the superclass, `None` for `java/lang/Object`.
    pub fn super_class_name(&self) -> Result<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool
            .class_name(self.super_class as usize)
            .map(Some)
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }
}

/// Reads a class file into memory.
pub fn read_class_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| ClassFormatError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Big-endian reader over the raw class file bytes.
struct ClassReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ClassReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    fn u1(&mut self, what: &'static str) -> Result<u8> {
        self.cursor
            .read_u8()
            .map_err(|_| ClassFormatError::Truncated { what })
    }

    fn u2(&mut self, what: &'static str) -> Result<u16> {
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|_| ClassFormatError::Truncated { what })
    }

    fn u4(&mut self, what: &'static str) -> Result<u32> {
        self.cursor
            .read_u32::<BigEndian>()
            .map_err(|_| ClassFormatError::Truncated { what })
    }

    fn bytes(&mut self, len: usize, what: &'static str) -> Result<Vec<u8>> {
        if len > self.remaining() {
            return Err(ClassFormatError::Truncated { what });
        }
        let mut buf = vec![0u8; len];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| ClassFormatError::Truncated { what })?;
        Ok(buf)
    }

    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        (len - self.cursor.position().min(len)) as usize
    }
}

/// Class file decoder.
pub struct JVMParser;

impl JVMParser {
    /// Decodes a complete class file.
    pub fn parse(class_file_bytes: &[u8]) -> Result<JVMClassFile> {
        let mut reader = ClassReader::new(class_file_bytes);

        let magic = reader.u4("magic")?;
        if magic != CLASS_MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = reader.u2("minor_version")?;
        let major_version = reader.u2("major_version")?;
        let constant_pool = Self::parse_constant_pool(&mut reader)?;
        let access_flags = reader.u2("access_flags")?;
        let this_class = reader.u2("this_class")?;
        let super_class = reader.u2("super_class")?;

        let interfaces_count = reader.u2("interfaces_count")?;
        let interfaces = (0..interfaces_count)
            .map(|_| reader.u2("interfaces"))
            .collect::<Result<Vec<_>>>()?;

        let fields_count = reader.u2("fields_count")?;
        let fields = (0..fields_count)
            .map(|_| Self::parse_member(&mut reader, &constant_pool))
            .collect::<Result<Vec<_>>>()?;

        let methods_count = reader.u2("methods_count")?;
        let methods = (0..methods_count)
            .map(|_| Self::parse_member(&mut reader, &constant_pool))
            .collect::<Result<Vec<_>>>()?;

        let attributes = Self::parse_attributes(&mut reader, &constant_pool)?;

        let trailing = reader.remaining();
        if trailing != 0 {
            return Err(ClassFormatError::TrailingBytes(trailing));
        }

        // Interfaces, fields and class attributes are checked for
        // well-formedness only; nothing at run time refers to them.
        debug!(
            major_version,
            minor_version,
            access_flags,
            constants = constant_pool.len(),
            interfaces = interfaces.len(),
            fields = fields.len(),
            methods = methods.len(),
            attributes = attributes.len(),
            "decoded class file"
        );

        Ok(JVMClassFile {
            minor_version,
            major_version,
            constant_pool,
            this_class,
            super_class,
            methods,
        })
    }

    fn parse_constant_pool(reader: &mut ClassReader) -> Result<ConstantPool> {
        let count = reader.u2("constant_pool_count")? as usize;
        let mut entries = Vec::with_capacity(count);
        // Indices start at 1, longs and doubles take two slots.
        let mut index = 1;
        while index < count {
            let entry = Self::parse_constant(reader, index)?;
            index += entry.slots();
            entries.push(entry);
        }
        Ok(ConstantPool::new(entries))
    }

    fn parse_constant(reader: &mut ClassReader, index: usize) -> Result<CPInfo> {
        let what = "constant pool";
        let tag = reader.u1(what)?;
        let entry = match tag {
            1 => {
                let length = reader.u2(what)? as usize;
                let raw = reader.bytes(length, what)?;
                let bytes =
                    String::from_utf8(raw).map_err(|_| ClassFormatError::InvalidUtf8 { index })?;
                CPInfo::ConstantUtf8 { bytes }
            }
            3 => CPInfo::ConstantInteger {
                bytes: reader.u4(what)? as i32,
            },
            4 => CPInfo::ConstantFloat {
                bits: reader.u4(what)?,
            },
            5 => {
                let high = reader.u4(what)? as u64;
                let low = reader.u4(what)? as u64;
                CPInfo::ConstantLong {
                    bytes: ((high << 32) | low) as i64,
                }
            }
            6 => {
                let high = reader.u4(what)? as u64;
                let low = reader.u4(what)? as u64;
                CPInfo::ConstantDouble {
                    bits: (high << 32) | low,
                }
            }
            7 => CPInfo::ConstantClass {
                name_index: reader.u2(what)?,
            },
            8 => CPInfo::ConstantString {
                string_index: reader.u2(what)?,
            },
            9 => CPInfo::ConstantFieldRef {
                class_index: reader.u2(what)?,
                name_and_type_index: reader.u2(what)?,
            },
            10 => CPInfo::ConstantMethodRef {
                class_index: reader.u2(what)?,
                name_and_type_index: reader.u2(what)?,
            },
            11 => CPInfo::ConstantInterfaceMethodRef {
                class_index: reader.u2(what)?,
                name_and_type_index: reader.u2(what)?,
            },
            12 => CPInfo::ConstantNameAndType {
                name_index: reader.u2(what)?,
                descriptor_index: reader.u2(what)?,
            },
            15 => CPInfo::ConstantMethodHandle {
                reference_kind: reader.u1(what)?,
                reference_index: reader.u2(what)?,
            },
            16 => CPInfo::ConstantMethodType {
                descriptor_index: reader.u2(what)?,
            },
            17 => CPInfo::ConstantDynamic {
                bootstrap_method_attr_index: reader.u2(what)?,
                name_and_type_index: reader.u2(what)?,
            },
            18 => CPInfo::ConstantInvokeDynamic {
                bootstrap_method_attr_index: reader.u2(what)?,
                name_and_type_index: reader.u2(what)?,
            },
            19 => CPInfo::ConstantModule {
                name_index: reader.u2(what)?,
            },
            20 => CPInfo::ConstantPackage {
                name_index: reader.u2(what)?,
            },
            tag => return Err(ClassFormatError::UnknownConstantTag { tag, index }),
        };
        Ok(entry)
    }

    fn parse_member(reader: &mut ClassReader, pool: &ConstantPool) -> Result<MemberInfo> {
        let access_flags = reader.u2("access_flags")?;
        let name_index = reader.u2("name_index")?;
        let descriptor_index = reader.u2("descriptor_index")?;
        let attributes = Self::parse_attributes(reader, pool)?;
        Ok(MemberInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    fn parse_attributes(
        reader: &mut ClassReader,
        pool: &ConstantPool,
    ) -> Result<HashMap<String, AttributeInfo>> {
        let count = reader.u2("attributes_count")?;
        let mut attributes = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let name_index = reader.u2("attribute_name_index")? as usize;
            let name = pool.utf8(name_index)?.to_owned();
            let length = reader.u4("attribute_length")? as usize;
            let info = reader.bytes(length, "attribute info")?;
            let attribute = if name == "Code" {
                Self::parse_code(&info, pool)?
            } else {
                AttributeInfo::Raw { info }
            };
            attributes.insert(name, attribute);
        }
        Ok(attributes)
    }

    fn parse_code(info: &[u8], pool: &ConstantPool) -> Result<AttributeInfo> {
        let mut reader = ClassReader::new(info);
        let max_stack = reader.u2("max_stack")?;
        let max_locals = reader.u2("max_locals")?;
        let code_length = reader.u4("code_length")? as usize;
        let code = reader.bytes(code_length, "code")?;

        let exception_table_length = reader.u2("exception_table_length")?;
        let exception_table = (0..exception_table_length)
            .map(|_| {
                Ok(ExceptionTableEntry {
                    start_pc: reader.u2("exception_table")?,
                    end_pc: reader.u2("exception_table")?,
                    handler_pc: reader.u2("exception_table")?,
                    catch_type: reader.u2("exception_table")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let attributes = Self::parse_attributes(&mut reader, pool)?;
        Ok(AttributeInfo::CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }
}
