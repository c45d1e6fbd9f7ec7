use std::collections::HashMap;
use std::str;

use crate::constants::{CHARACTER_SET_BINARY, CHARACTER_SET_UTF8};

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MysqlType {
    // NULL_TYPE specifies a NULL type.
    TypeNullType = 0,
    // INT8 specifies a TINYINT type.
    TypeInt8 = 257,
    // UINT8 specifies a TINYINT UNSIGNED type.
    TypeUint8 = 770,
    // INT16 specifies a SMALLINT type.
    TypeInt16 = 259,
    // UINT16 specifies a SMALLINT UNSIGNED type.
    TypeUint16 = 772,
    // INT24 specifies a MEDIUMINT type.
    TypeInt24 = 261,
    // UINT24 specifies a MEDIUMINT UNSIGNED type.
    TypeUint24 = 774,
    // INT32 specifies a INTEGER type.
    TypeInt32 = 263,
    // UINT32 specifies a INTEGER UNSIGNED type.
    TypeUint32 = 776,
    // INT64 specifies a BIGINT type.
    TypeInt64 = 265,
    // UINT64 specifies a BIGINT UNSIGNED type.
    TypeUint64 = 778,
    // FLOAT32 specifies a FLOAT type.
    TypeFloat32 = 1035,
    // FLOAT64 specifies a DOUBLE or REAL type.
    TypeFloat64 = 1036,
    TypeTimestamp = 2061,
    TypeDate = 2062,
    TypeTime = 2063,
    TypeDatetime = 2064,
    TypeYear = 785,
    // DECIMAL specifies a DECIMAL or NUMERIC type.
    TypeDecimal = 18,
    TypeText = 6163,
    TypeBlob = 10260,
    TypeVarchar = 6165,
    TypeVarBinary = 10262,
    TypeChar = 6167,
    TypeBinary = 10264,
    TypeBit = 2073,
    TypeEnum = 2074,
    TypeSet = 2075,
    TypeGeometry = 2077,
    TypeJson = 2078,
}

pub enum MysqlFlag {
    MysqlUnsigned = 32,
    MysqlBinary = 128,
    MysqlEnum = 256,
    MysqlSet = 2048,
}

pub type Type = i32;

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub typ: Type,
    pub val: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub typ: Type,
    pub table: String,
    pub org_table: String,
    pub database: String,
    pub org_name: String,
    pub column_len: u32,
    pub charset: u32,
    pub decimals: u32,
    pub flags: u32,
}

/// One result of a statement: either an OK (no fields) or a result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlResult {
    pub fields: Vec<Field>,
    pub affected_rows: u64,
    pub insert_id: u64,
    pub rows: Vec<Vec<Value>>,
}

impl Value {
    pub fn new(typ: MysqlType, val: Vec<u8>) -> Self {
        Value {
            typ: typ as Type,
            val,
        }
    }

    pub fn null() -> Self {
        Value {
            typ: MysqlType::TypeNullType as Type,
            val: vec![],
        }
    }

    pub fn text<S: AsRef<str>>(s: S) -> Self {
        Value::new(MysqlType::TypeVarchar, s.as_ref().as_bytes().to_vec())
    }

    pub fn is_null(&self) -> bool {
        self.typ == MysqlType::TypeNullType as Type
    }

    /// Text form of the value, `None` for NULL or non utf8 data.
    pub fn as_str(&self) -> Option<&str> {
        if self.is_null() {
            return None;
        }
        str::from_utf8(&self.val).ok()
    }
}

impl Field {
    pub fn new<S: Into<String>>(name: S, typ: MysqlType) -> Self {
        let name = name.into();
        let charset = match typ {
            MysqlType::TypeBlob | MysqlType::TypeVarBinary | MysqlType::TypeBinary => {
                CHARACTER_SET_BINARY as u32
            }
            _ => CHARACTER_SET_UTF8 as u32,
        };
        Field {
            org_name: name.clone(),
            name,
            typ: typ as Type,
            table: String::new(),
            org_table: String::new(),
            database: String::new(),
            column_len: 255,
            charset,
            decimals: 0,
            flags: 0,
        }
    }
}

impl SqlResult {
    /// A result set with the given columns and rows.
    pub fn new(fields: Vec<Field>, rows: Vec<Vec<Value>>) -> Self {
        SqlResult {
            fields,
            rows,
            ..Default::default()
        }
    }

    pub fn ok(affected_rows: u64, insert_id: u64) -> Self {
        SqlResult {
            affected_rows,
            insert_id,
            ..Default::default()
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn first_value(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

lazy_static! {
    static ref TYPE_TO_MYSQL: HashMap<Type, (u8, u16)> = {
        let mut m = HashMap::new();
        m.insert(MysqlType::TypeInt8 as Type, (1, 0));
        m.insert(MysqlType::TypeUint8 as Type, (1, MysqlFlag::MysqlUnsigned as u16));
        m.insert(MysqlType::TypeInt16 as Type, (2, 0));
        m.insert(MysqlType::TypeUint16 as Type, (2, MysqlFlag::MysqlUnsigned as u16));
        m.insert(MysqlType::TypeInt32 as Type, (3, 0));
        m.insert(MysqlType::TypeUint32 as Type, (3, MysqlFlag::MysqlUnsigned as u16));
        m.insert(MysqlType::TypeFloat32 as Type, (4, 0));
        m.insert(MysqlType::TypeFloat64 as Type, (5, 0));
        m.insert(MysqlType::TypeNullType as Type, (6, MysqlFlag::MysqlBinary as u16));
        m.insert(MysqlType::TypeTimestamp as Type, (7, 0));
        m.insert(MysqlType::TypeInt64 as Type, (8, 0));
        m.insert(MysqlType::TypeUint64 as Type, (8, MysqlFlag::MysqlUnsigned as u16));
        m.insert(MysqlType::TypeInt24 as Type, (9, 0));
        m.insert(MysqlType::TypeUint24 as Type, (9, MysqlFlag::MysqlUnsigned as u16));
        m.insert(MysqlType::TypeDate as Type, (10, MysqlFlag::MysqlBinary as u16));
        m.insert(MysqlType::TypeTime as Type, (11, MysqlFlag::MysqlBinary as u16));
        m.insert(MysqlType::TypeDatetime as Type, (12, MysqlFlag::MysqlBinary as u16));
        m.insert(MysqlType::TypeYear as Type, (13, MysqlFlag::MysqlUnsigned as u16));
        m.insert(MysqlType::TypeBit as Type, (16, MysqlFlag::MysqlUnsigned as u16));
        m.insert(MysqlType::TypeJson as Type, (245, 0));
        m.insert(MysqlType::TypeDecimal as Type, (246, 0));
        m.insert(MysqlType::TypeText as Type, (252, 0));
        m.insert(MysqlType::TypeBlob as Type, (252, MysqlFlag::MysqlBinary as u16));
        m.insert(MysqlType::TypeVarchar as Type, (253, 0));
        m.insert(MysqlType::TypeVarBinary as Type, (253, MysqlFlag::MysqlBinary as u16));
        m.insert(MysqlType::TypeChar as Type, (254, 0));
        m.insert(MysqlType::TypeBinary as Type, (254, MysqlFlag::MysqlBinary as u16));
        m.insert(MysqlType::TypeEnum as Type, (254, MysqlFlag::MysqlEnum as u16));
        m.insert(MysqlType::TypeSet as Type, (254, MysqlFlag::MysqlSet as u16));
        m.insert(MysqlType::TypeGeometry as Type, (255, 0));
        m
    };
}

/// Return (column type, flags) as written in a column definition; flags could be zero.
pub fn type_to_mysql(typ: Type) -> Option<(u8, u16)> {
    TYPE_TO_MYSQL.get(&typ).cloned()
}

/// Reverse of `type_to_mysql` for a column definition read off the wire.
pub fn mysql_to_type(typ: u8, flags: u16) -> Type {
    let unsigned = flags & MysqlFlag::MysqlUnsigned as u16 != 0;
    let binary = flags & MysqlFlag::MysqlBinary as u16 != 0;
    let t = match typ {
        1 if unsigned => MysqlType::TypeUint8,
        1 => MysqlType::TypeInt8,
        2 if unsigned => MysqlType::TypeUint16,
        2 => MysqlType::TypeInt16,
        3 if unsigned => MysqlType::TypeUint32,
        3 => MysqlType::TypeInt32,
        4 => MysqlType::TypeFloat32,
        5 => MysqlType::TypeFloat64,
        6 => MysqlType::TypeNullType,
        7 => MysqlType::TypeTimestamp,
        8 if unsigned => MysqlType::TypeUint64,
        8 => MysqlType::TypeInt64,
        9 if unsigned => MysqlType::TypeUint24,
        9 => MysqlType::TypeInt24,
        10 => MysqlType::TypeDate,
        11 => MysqlType::TypeTime,
        12 => MysqlType::TypeDatetime,
        13 => MysqlType::TypeYear,
        16 => MysqlType::TypeBit,
        245 => MysqlType::TypeJson,
        246 => MysqlType::TypeDecimal,
        252 if binary => MysqlType::TypeBlob,
        252 => MysqlType::TypeText,
        253 if binary => MysqlType::TypeVarBinary,
        254 if flags & MysqlFlag::MysqlEnum as u16 != 0 => MysqlType::TypeEnum,
        254 if flags & MysqlFlag::MysqlSet as u16 != 0 => MysqlType::TypeSet,
        254 if binary => MysqlType::TypeBinary,
        254 => MysqlType::TypeChar,
        255 => MysqlType::TypeGeometry,
        _ => MysqlType::TypeVarchar,
    };
    t as Type
}

#[cfg(test)]
mod tests {
    use crate::sql_type::{mysql_to_type, type_to_mysql, MysqlType, Type, Value};

    #[test]
    fn test_type_mapping() {
        for typ in &[
            MysqlType::TypeUint8,
            MysqlType::TypeInt64,
            MysqlType::TypeBlob,
            MysqlType::TypeVarchar,
            MysqlType::TypeEnum,
            MysqlType::TypeChar,
        ] {
            let (t, flags) = type_to_mysql(*typ as Type).unwrap();
            assert_eq!(mysql_to_type(t, flags), *typ as Type);
        }
        assert!(type_to_mysql(12345).is_none());
    }

    #[test]
    fn test_value() {
        assert!(Value::null().is_null());
        assert_eq!(Value::null().as_str(), None);
        assert_eq!(Value::text("abc").as_str(), Some("abc"));
    }
}
