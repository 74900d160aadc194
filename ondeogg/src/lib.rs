//! Lecture de flux Ogg page par page
//!
//! Ce crate fournit un lecteur mono-passe qui découpe un flux d'octets en
//! pages Ogg (capture pattern `OggS`, en-tête de 23 octets, table des
//! segments, charge utile) et permet d'itérer sur les paquets contenus dans
//! chaque page.
//!
//! Le découpage en paquets suit la règle du lacing Ogg : chaque entrée de la
//! table des segments < 255 termine un paquet, une entrée égale à 255
//! signifie que le paquet continue dans le segment suivant.
//!
//! # Exemple
//!
//! ```no_run
//! use ondeogg::PageReader;
//!
//! # async fn example(stdout: tokio::process::ChildStdout) -> Result<(), ondeogg::OggError> {
//! let mut reader = PageReader::new(stdout);
//! loop {
//!     let page = reader.next_page().await?;
//!     for (packet, continued) in page.packets() {
//!         // traiter le paquet
//!         let _ = (packet, continued);
//!     }
//! }
//! # }
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

/// Capture pattern au début de chaque page Ogg.
pub const PAGE_MAGIC: &[u8; 4] = b"OggS";

/// Taille de l'en-tête de page après le capture pattern.
pub const HEADER_LEN: usize = 23;

/// Bit BOS (begin of stream) du header type.
pub const FLAG_BOS: u8 = 0x02;

/// Erreurs de lecture d'un flux Ogg.
#[derive(Debug, thiserror::Error)]
pub enum OggError {
    /// Fin de flux propre : EOF exactement avant un capture pattern.
    #[error("ogg stream ended")]
    StreamEnded,

    /// Structure tronquée ou capture pattern invalide.
    #[error("malformed ogg stream: {0}")]
    MalformedStream(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Une page Ogg telle que lue sur le flux.
///
/// `header` est le reste de l'en-tête après le capture pattern : version,
/// header type, position de granule, numéro de série, numéro de séquence,
/// checksum et nombre de segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OggPage {
    pub header: [u8; HEADER_LEN],
    pub segtable: Vec<u8>,
    pub data: Vec<u8>,
}

impl OggPage {
    /// Header type de la page (octet 5 de l'en-tête brut).
    pub fn flag(&self) -> u8 {
        self.header[1]
    }

    /// Vrai si la page porte le bit BOS.
    pub fn is_bos(&self) -> bool {
        self.flag() & FLAG_BOS != 0
    }

    /// Numéro de séquence de la page.
    pub fn sequence(&self) -> u32 {
        u32::from_le_bytes([
            self.header[14],
            self.header[15],
            self.header[16],
            self.header[17],
        ])
    }

    /// Position de granule portée par la page.
    pub fn granule_position(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.header[2..10]);
        u64::from_le_bytes(raw)
    }

    /// Reconstruit la page telle qu'elle est apparue sur le flux.
    pub fn raw(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(PAGE_MAGIC.len() + HEADER_LEN + self.segtable.len() + self.data.len());
        out.extend_from_slice(PAGE_MAGIC);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.segtable);
        out.extend_from_slice(&self.data);
        out
    }

    /// Itère sur les paquets de la page sous forme `(données, continué)`.
    ///
    /// `continué` vaut `true` quand le paquet se poursuit dans la page
    /// suivante (dernier segment de lacing égal à 255).
    pub fn packets(&self) -> Packets<'_> {
        Packets {
            page: self,
            seg_idx: 0,
            offset: 0,
        }
    }
}

/// Itérateur sur les paquets d'une page, voir [`OggPage::packets`].
pub struct Packets<'a> {
    page: &'a OggPage,
    seg_idx: usize,
    offset: usize,
}

impl<'a> Iterator for Packets<'a> {
    type Item = (&'a [u8], bool);

    fn next(&mut self) -> Option<Self::Item> {
        if self.seg_idx >= self.page.segtable.len() {
            return None;
        }

        let start = self.offset;
        let mut continued = true;
        while self.seg_idx < self.page.segtable.len() {
            let lacing = self.page.segtable[self.seg_idx];
            self.seg_idx += 1;
            self.offset += lacing as usize;
            if lacing < 255 {
                continued = false;
                break;
            }
        }

        Some((&self.page.data[start..self.offset], continued))
    }
}

/// Lecteur mono-passe de pages Ogg sur une source asynchrone.
pub struct PageReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> PageReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Lit la page suivante du flux.
    ///
    /// # Erreurs
    ///
    /// - [`OggError::StreamEnded`] si le flux se termine proprement, c'est à
    ///   dire zéro octet lu là où un capture pattern devait commencer.
    /// - [`OggError::MalformedStream`] si le capture pattern est invalide ou
    ///   si une structure (en-tête, table des segments, données) est
    ///   tronquée.
    pub async fn next_page(&mut self) -> Result<OggPage, OggError> {
        let mut magic = [0u8; 4];
        let mut filled = 0usize;
        while filled < magic.len() {
            let n = self.reader.read(&mut magic[filled..]).await?;
            if n == 0 {
                return if filled == 0 {
                    Err(OggError::StreamEnded)
                } else {
                    Err(OggError::MalformedStream("truncated capture pattern"))
                };
            }
            filled += n;
        }

        if &magic != PAGE_MAGIC {
            return Err(OggError::MalformedStream("invalid capture pattern"));
        }

        let mut header = [0u8; HEADER_LEN];
        read_exact_or(&mut self.reader, &mut header, "truncated page header").await?;

        let segment_count = header[HEADER_LEN - 1] as usize;
        let mut segtable = vec![0u8; segment_count];
        read_exact_or(&mut self.reader, &mut segtable, "truncated segment table").await?;

        let body_len: usize = segtable.iter().map(|&lacing| lacing as usize).sum();
        let mut data = vec![0u8; body_len];
        read_exact_or(&mut self.reader, &mut data, "truncated page data").await?;

        Ok(OggPage {
            header,
            segtable,
            data,
        })
    }

    /// Rend la source sous-jacente.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

async fn read_exact_or<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<(), OggError> {
    reader.read_exact(buf).await.map(|_| ()).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            OggError::MalformedStream(context)
        } else {
            OggError::Io(e)
        }
    })
}
