//! Master-data records: products and warehouses
//!
//! The workflow consults the catalog for existence checks and display names.
//! `ProductRecord::quantity` and `status` are derived fields owned by the
//! stock reconciliation step; registration never sets them.

use crate::error::{NoteError, NoteResult};

/// Derived availability flag, recomputed whenever a product total changes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ProductStatus {
    #[n(0)]
    InStock,
    #[n(1)]
    OutOfStock,
}

impl core::fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ProductStatus::InStock => "instock",
            ProductStatus::OutOfStock => "outofstock",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ProductRecord {
    #[n(0)]
    pub code: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub size: Option<String>,
    #[n(3)]
    pub color: Option<String>,
    /// Total tracked quantity across the system pool and every warehouse.
    #[n(4)]
    pub quantity: u64,
    #[n(5)]
    pub status: ProductStatus,
}

impl ProductRecord {
    pub(crate) fn to_cbor(&self) -> NoteResult<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| NoteError::Codec(e.to_string()))
    }

    pub(crate) fn from_cbor(bytes: &[u8]) -> NoteResult<Self> {
        minicbor::decode(bytes).map_err(|e| NoteError::Codec(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct WarehouseRecord {
    #[n(0)]
    pub code: String,
    #[n(1)]
    pub name: String,
}

impl WarehouseRecord {
    fn to_cbor(&self) -> NoteResult<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| NoteError::Codec(e.to_string()))
    }

    fn from_cbor(bytes: &[u8]) -> NoteResult<Self> {
        minicbor::decode(bytes).map_err(|e| NoteError::Codec(e.to_string()))
    }
}

/// Lookup surface over the `products` and `warehouses` trees.
pub struct Catalog {
    pub(crate) products: sled::Tree,
    pub(crate) warehouses: sled::Tree,
}

impl Catalog {
    pub fn open(db: &sled::Db) -> NoteResult<Self> {
        Ok(Self {
            products: db.open_tree("products")?,
            warehouses: db.open_tree("warehouses")?,
        })
    }

    /// Register a product master record. Quantity starts at zero and is only
    /// ever moved by note completion.
    pub fn register_product(
        &self,
        code: &str,
        name: &str,
        size: Option<&str>,
        color: Option<&str>,
    ) -> NoteResult<ProductRecord> {
        if code.trim().is_empty() || name.trim().is_empty() {
            return Err(NoteError::validation("product code and name are required"));
        }
        if self.products.contains_key(code)? {
            return Err(NoteError::validation(format!(
                "product {code} is already registered"
            )));
        }

        let record = ProductRecord {
            code: code.to_string(),
            name: name.to_string(),
            size: size.map(str::to_string),
            color: color.map(str::to_string),
            quantity: 0,
            status: ProductStatus::OutOfStock,
        };
        self.products.insert(code, record.to_cbor()?)?;
        Ok(record)
    }

    pub fn register_warehouse(&self, code: &str, name: &str) -> NoteResult<WarehouseRecord> {
        if code.trim().is_empty() || name.trim().is_empty() {
            return Err(NoteError::validation("warehouse code and name are required"));
        }
        if self.warehouses.contains_key(code)? {
            return Err(NoteError::validation(format!(
                "warehouse {code} is already registered"
            )));
        }

        let record = WarehouseRecord {
            code: code.to_string(),
            name: name.to_string(),
        };
        self.warehouses.insert(code, record.to_cbor()?)?;
        Ok(record)
    }

    pub fn product_exists(&self, code: &str) -> NoteResult<bool> {
        Ok(self.products.contains_key(code)?)
    }

    pub fn warehouse_exists(&self, code: &str) -> NoteResult<bool> {
        Ok(self.warehouses.contains_key(code)?)
    }

    pub fn product(&self, code: &str) -> NoteResult<Option<ProductRecord>> {
        match self.products.get(code)? {
            Some(bytes) => Ok(Some(ProductRecord::from_cbor(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn warehouse_display_name(&self, code: &str) -> NoteResult<Option<String>> {
        match self.warehouses.get(code)? {
            Some(bytes) => Ok(Some(WarehouseRecord::from_cbor(&bytes)?.name)),
            None => Ok(None),
        }
    }

    /// All registered products, in code order.
    pub fn products(&self) -> NoteResult<Vec<ProductRecord>> {
        let mut out = Vec::new();
        for entry in self.products.iter() {
            let (_, bytes) = entry?;
            out.push(ProductRecord::from_cbor(&bytes)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("catalog.db")).unwrap();
        let catalog = Catalog::open(&db).unwrap();
        (dir, catalog)
    }

    #[test]
    fn registration_and_lookup() {
        let (_dir, catalog) = open_catalog();

        catalog
            .register_product("PR0001", "Shirt", Some("M"), Some("black"))
            .unwrap();
        catalog.register_warehouse("WH0001", "North depot").unwrap();

        assert!(catalog.product_exists("PR0001").unwrap());
        assert!(!catalog.product_exists("PR9999").unwrap());
        assert!(catalog.warehouse_exists("WH0001").unwrap());
        assert_eq!(
            catalog.warehouse_display_name("WH0001").unwrap().as_deref(),
            Some("North depot")
        );

        let record = catalog.product("PR0001").unwrap().unwrap();
        assert_eq!(record.quantity, 0);
        assert_eq!(record.status, ProductStatus::OutOfStock);

        let all = catalog.products().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].code, "PR0001");
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let (_dir, catalog) = open_catalog();

        catalog.register_product("PR0001", "Shirt", None, None).unwrap();
        let err = catalog
            .register_product("PR0001", "Shirt again", None, None)
            .unwrap_err();
        assert!(matches!(err, NoteError::Validation(_)));
    }
}
